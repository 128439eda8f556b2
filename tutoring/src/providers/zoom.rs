//! Zoom meeting client using server-to-server OAuth.

use super::{
    Meeting, MeetingProvider, MeetingRequest,
    errors::{ProviderError, ProviderResult},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Server-to-server OAuth app credentials
#[derive(Debug, Clone)]
pub struct ZoomCredentials {
    pub account_id: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Zoom client
pub struct ZoomClient {
    http: reqwest::Client,
    credentials: ZoomCredentials,
    oauth_url: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct CreateMeetingBody<'a> {
    topic: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    start_time: String,
    duration: i64,
    timezone: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agenda: Option<&'a str>,
    settings: MeetingSettings<'a>,
}

#[derive(Debug, Serialize)]
struct MeetingSettings<'a> {
    join_before_host: bool,
    meeting_invitees: Vec<Invitee<'a>>,
}

#[derive(Debug, Serialize)]
struct Invitee<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct MeetingBody {
    join_url: String,
}

#[derive(Debug, Deserialize)]
struct ZoomErrorBody {
    message: Option<String>,
}

/// Scheduled meeting
const SCHEDULED_MEETING: u8 = 2;

/// Refresh the token this long before Zoom expires it
const TOKEN_SLACK: Duration = Duration::from_secs(60);

impl ZoomClient {
    pub fn new(credentials: ZoomCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            oauth_url: "https://zoom.us/oauth/token".to_string(),
            api_base: "https://api.zoom.us/v2".to_string(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> ProviderResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }

        let response = self
            .http
            .post(&self.oauth_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .query(&[
                ("grant_type", "account_credentials"),
                ("account_id", self.credentials.account_id.as_str()),
            ])
            .send()
            .await?;
        let body: TokenBody = decode(response).await?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_SLACK);
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(body.access_token)
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> ProviderResult<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<ZoomErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.to_string());
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

#[async_trait]
impl MeetingProvider for ZoomClient {
    async fn create_meeting(&self, request: &MeetingRequest) -> ProviderResult<Meeting> {
        let token = self.access_token().await?;
        let body = CreateMeetingBody {
            topic: &request.title,
            kind: SCHEDULED_MEETING,
            start_time: request.start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            duration: request.duration_minutes(),
            timezone: request.timezone.as_deref().unwrap_or("UTC"),
            agenda: request.agenda.as_deref(),
            settings: MeetingSettings {
                join_before_host: false,
                meeting_invitees: request
                    .attendees
                    .iter()
                    .map(|email| Invitee { email })
                    .collect(),
            },
        };

        let response = self
            .http
            .post(format!("{}/users/me/meetings", self.api_base))
            .bearer_auth(token)
            .header("x-request-id", request.request_id.to_string())
            .json(&body)
            .send()
            .await?;
        let meeting: MeetingBody = decode(response).await?;

        Ok(Meeting {
            join_url: meeting.join_url,
        })
    }
}
