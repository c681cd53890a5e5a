//! HTTP client for the fundraising platform. Implements every collaborator
//! the leaderboard needs: the donation feed, the costume field, the private
//! donor directory and the messaging provider.

use crate::config::{CostumePrompt, Raisely as RaiselyConfig};
use crate::costume::{CostumeRegistry, RegistryError};
use crate::metrics_defs::{COSTUME_REGISTERED, DONATION_PAGES};
use crate::notify::{DonorContact, DonorDirectory, Messenger, NotificationEvent, NotifyError};
use crate::source::{DonationSource, SourceError};
use crate::types::{CostumeOption, DonationRecord};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::{counter, histogram};
use std::collections::HashSet;

pub const PAGE_SIZE: usize = 150;

const COSTUME_FIELD: &str = "costumeVote";
const CLOTHING_FIELD: &str = "clothing";
const PICTURE_FIELD: &str = "pictureOfCostumeItem";

#[derive(Deserialize, Serialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct Page<T> {
    data: Vec<T>,
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct Pagination {
    total: Option<u64>,
}

#[derive(Deserialize)]
struct Field {
    uuid: String,
    name: String,
    #[serde(default)]
    options: Vec<CostumeOption>,
}

#[derive(Serialize)]
struct OptionsUpdate<'a> {
    options: &'a [CostumeOption],
}

#[derive(Serialize)]
struct DefaultUpdate<'a> {
    default: &'a str,
}

pub struct RaiselyClient {
    client: reqwest::Client,
    api_url: Url,
    communications_url: Url,
    campaign_path: String,
    token: String,
    prompts: Vec<CostumePrompt>,
}

impl RaiselyClient {
    pub fn new(config: RaiselyConfig, prompts: Vec<CostumePrompt>) -> Self {
        RaiselyClient {
            client: reqwest::Client::new(),
            api_url: config.api_url,
            communications_url: config.communications_url,
            campaign_path: config.campaign_path,
            token: config.token,
            prompts,
        }
    }

    fn endpoint(base: &Url, path: &str) -> Result<Url, SourceError> {
        Ok(Url::parse(&format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path
        ))?)
    }

    fn api(&self, path: &str) -> Result<Url, SourceError> {
        Self::endpoint(&self.api_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: response.url().to_string(),
                status,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, private: bool) -> Result<T, SourceError> {
        let mut request = self.client.get(url);
        if private {
            request = request.bearer_auth(&self.token);
        }
        let response = Self::check(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    async fn patch_field<T: Serialize>(&self, uuid: &str, data: T) -> Result<(), SourceError> {
        let url = self.api(&format!("fields/{uuid}"))?;
        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.token)
            .json(&Envelope { data })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn fetch_fields(&self) -> Result<Vec<Field>, SourceError> {
        let mut url = self.api(&format!("campaigns/{}/fields", self.campaign_path))?;
        url.query_pairs_mut().append_pair("private", "1");
        let fields: Envelope<Vec<Field>> = self.get_json(url, true).await?;
        Ok(fields.data)
    }

    /// Pre-fills the costume description on the donation form with the first
    /// configured prompt nobody has proposed yet, so large donors are not
    /// stuck thinking one up.
    async fn rotate_suggestion(&self, fields: &[Field]) -> Result<(), SourceError> {
        let donations = self.fetch_donations().await?;
        let proposed: HashSet<&str> = donations
            .iter()
            .filter_map(|d| d.public.as_ref()?.clothing.as_deref())
            .collect();

        let Some(prompt) = self
            .prompts
            .iter()
            .find(|p| !proposed.contains(p.description.as_str()))
        else {
            tracing::info!("all costume prompts have been proposed");
            return Ok(());
        };

        let find = |name: &str| fields.iter().find(|f| f.name == name);
        let (Some(description), Some(picture)) = (find(CLOTHING_FIELD), find(PICTURE_FIELD)) else {
            tracing::warn!("campaign is missing the costume description fields, not updating the suggestion");
            return Ok(());
        };

        let photo_url = prompt.photo_url.as_deref().unwrap_or_default();
        tokio::try_join!(
            self.patch_field(&description.uuid, DefaultUpdate { default: &prompt.description }),
            self.patch_field(&picture.uuid, DefaultUpdate { default: photo_url }),
        )?;
        tracing::info!(suggestion = %prompt.description, "updated costume suggestion");
        Ok(())
    }
}

fn decode_records(items: Vec<serde_json::Value>, offset: usize) -> Vec<DonationRecord> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match DonationRecord::deserialize(item) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(index = offset + i, error = %e, "skipping malformed donation record");
                None
            }
        })
        .collect()
}

#[async_trait]
impl DonationSource for RaiselyClient {
    async fn fetch_donations(&self) -> Result<Vec<DonationRecord>, SourceError> {
        let mut records = Vec::new();
        let mut offset = 0;
        let mut pages = 0;

        loop {
            let mut url = self.api(&format!("campaigns/{}/donations", self.campaign_path))?;
            url.query_pairs_mut()
                .append_pair("limit", &PAGE_SIZE.to_string())
                .append_pair("offset", &offset.to_string());

            // Items are decoded one by one so a malformed donation is skipped
            // instead of failing the whole feed.
            let page: Page<serde_json::Value> = self.get_json(url, false).await?;
            pages += 1;

            let fetched = page.data.len();
            records.extend(decode_records(page.data, offset));
            offset += fetched;

            let has_more = match page.pagination.and_then(|p| p.total) {
                Some(total) => (offset as u64) < total,
                None => fetched == PAGE_SIZE,
            };
            if !has_more || fetched == 0 {
                break;
            }
        }

        histogram!(DONATION_PAGES).record(pages as f64);
        tracing::debug!(pages, donations = records.len(), "fetched donation feed");
        Ok(records)
    }

    async fn fetch_costume_options(&self) -> Result<Vec<CostumeOption>, SourceError> {
        let fields = self.fetch_fields().await?;
        match fields.into_iter().find(|f| f.name == COSTUME_FIELD) {
            Some(field) => Ok(field.options),
            None => {
                tracing::warn!(field = COSTUME_FIELD, "campaign has no costume field");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl CostumeRegistry for RaiselyClient {
    async fn register(&self, option: CostumeOption) -> Result<bool, RegistryError> {
        let fields = self.fetch_fields().await?;
        let field = fields
            .iter()
            .find(|f| f.name == COSTUME_FIELD)
            .ok_or(RegistryError::MissingField(COSTUME_FIELD))?;

        if field.options.iter().any(|o| o.id == option.id) {
            tracing::debug!(id = %option.id, "costume option already exists");
            return Ok(false);
        }

        tracing::info!(id = %option.id, label = %option.label, "adding new costume option");
        let mut options = field.options.clone();
        options.push(option);
        // Shuffled so no option keeps a top-of-the-list advantage
        options.shuffle(&mut rand::rng());

        self.patch_field(&field.uuid, OptionsUpdate { options: &options })
            .await?;
        counter!(COSTUME_REGISTERED).increment(1);

        // The option is in; a stale suggestion is only cosmetic.
        if let Err(e) = self.rotate_suggestion(&fields).await {
            tracing::warn!(error = %e, "could not update costume suggestion");
        }

        Ok(true)
    }
}

#[async_trait]
impl DonorDirectory for RaiselyClient {
    async fn lookup(&self, donor_id: &str) -> Result<DonorContact, NotifyError> {
        let lookup = async {
            let mut url = self.api("users")?;
            let base = url.to_string();
            url.path_segments_mut()
                .map_err(|()| SourceError::NotABase(base))?
                .push(donor_id);
            url.query_pairs_mut().append_pair("private", "true");
            let user: Envelope<DonorContact> = self.get_json(url, true).await?;
            Ok::<_, SourceError>(user.data)
        };
        lookup.await.map_err(|source| NotifyError::Lookup {
            donor_id: donor_id.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Messenger for RaiselyClient {
    async fn send(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let deliver = async {
            let url = Self::endpoint(&self.communications_url, "events")?;
            let response = self
                .client
                .post(url)
                .header(
                    reqwest::header::AUTHORIZATION,
                    format!("bearer raisely:{}", self.token),
                )
                .json(&Envelope { data: event })
                .send()
                .await?;
            Self::check(response).await?;
            Ok::<_, SourceError>(())
        };
        deliver.await.map_err(NotifyError::Delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{LeadMessage, MessageType, Recipient};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, prompts: Vec<CostumePrompt>) -> RaiselyClient {
        let config = RaiselyConfig {
            api_url: Url::parse(&server.uri()).unwrap(),
            communications_url: Url::parse(&format!("{}/comms", server.uri())).unwrap(),
            campaign_path: "wish".into(),
            campaign_uuid: "campaign-uuid".into(),
            token: "raisely-token".into(),
        };
        RaiselyClient::new(config, prompts)
    }

    fn donation_json(i: usize) -> serde_json::Value {
        json!({
            "user": {"uuid": format!("user{i}")},
            "preferredName": format!("Donor {i}"),
            "amount": 100,
        })
    }

    fn fields_json() -> serde_json::Value {
        json!({
            "data": [
                {"uuid": "costume-field-uuid", "name": "costumeVote", "options": [{"label": "Option 1", "value": "option1"}]},
                {"uuid": "costume-description-field-uuid", "name": "clothing"},
                {"uuid": "picture-of-costume-uuid", "name": "pictureOfCostumeItem"},
            ]
        })
    }

    #[tokio::test]
    async fn test_fetch_donations_follows_pages() {
        let server = MockServer::start().await;

        let first: Vec<_> = (0..PAGE_SIZE).map(donation_json).collect();
        Mock::given(method("GET"))
            .and(path("/campaigns/wish/donations"))
            .and(query_param("limit", "150"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": first,
                "pagination": {"total": 152, "offset": 0, "limit": 150},
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/campaigns/wish/donations"))
            .and(query_param("offset", "150"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [donation_json(150), donation_json(151)],
                "pagination": {"total": 152, "offset": 150, "limit": 150},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let records = client(&server, vec![]).fetch_donations().await.unwrap();
        assert_eq!(records.len(), 152);
        assert_eq!(records[151].preferred_name.as_deref(), Some("Donor 151"));
    }

    #[tokio::test]
    async fn test_malformed_donation_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns/wish/donations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"user": {"uuid": "user1"}, "amount": null},
                    donation_json(2),
                    {"user": "x", "amount": 100},
                    {"user": {"uuid": "user4"}, "amount": 12.5},
                ],
                "pagination": {"total": 4},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let records = client(&server, vec![]).fetch_donations().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].preferred_name.as_deref(), Some("Donor 2"));
    }

    #[tokio::test]
    async fn test_short_page_without_pagination_ends_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns/wish/donations"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": [donation_json(1)]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let records = client(&server, vec![]).fetch_donations().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns/wish/donations"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server, vec![]).fetch_donations().await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Status { status, .. } if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        ));
    }

    #[tokio::test]
    async fn test_fetch_costume_options_uses_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns/wish/fields"))
            .and(query_param("private", "1"))
            .and(header("authorization", "Bearer raisely-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fields_json()))
            .mount(&server)
            .await;

        let options = client(&server, vec![]).fetch_costume_options().await.unwrap();
        assert_eq!(options, vec![CostumeOption::new("option1", "Option 1", None)]);
    }

    #[tokio::test]
    async fn test_missing_costume_field_yields_no_options() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns/wish/fields"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let options = client(&server, vec![]).fetch_costume_options().await.unwrap();
        assert!(options.is_empty());
    }

    #[tokio::test]
    async fn test_register_adds_option_and_rotates_suggestion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns/wish/fields"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fields_json()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/campaigns/wish/donations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"user": {"uuid": "u1"}, "amount": 6000, "public": {"clothing": "Black Crew Top"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/fields/costume-field-uuid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/fields/costume-description-field-uuid"))
            .and(body_partial_json(json!({"data": {"default": "A Bad Tie"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/fields/picture-of-costume-uuid"))
            .and(body_partial_json(json!({"data": {"default": "https://ties.test"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let prompts = vec![
            CostumePrompt {
                description: "Black Crew Top".into(),
                photo_url: None,
            },
            CostumePrompt {
                description: "A Bad Tie".into(),
                photo_url: Some("https://ties.test".into()),
            },
        ];
        let added = client(&server, prompts)
            .register(CostumeOption::new(
                "cowboy-hat",
                "Cowboy Hat",
                Some("https://cowboy-hats.test".into()),
            ))
            .await
            .unwrap();
        assert!(added);

        let requests = server.received_requests().await.unwrap();
        let update = requests
            .iter()
            .find(|r| r.url.path() == "/fields/costume-field-uuid")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&update.body).unwrap();
        let mut ids: Vec<_> = body["data"]["options"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["value"].as_str().unwrap().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["cowboy-hat", "option1"]);
    }

    #[tokio::test]
    async fn test_register_existing_option_is_noop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns/wish/fields"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fields_json()))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let added = client(&server, vec![])
            .register(CostumeOption::new("option1", "Option 1", None))
            .await
            .unwrap();
        assert!(!added);
    }

    #[tokio::test]
    async fn test_lookup_donor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/user2-uuid"))
            .and(query_param("private", "true"))
            .and(header("authorization", "Bearer raisely-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "uuid": "user2-uuid",
                    "preferredName": "Andy",
                    "fullName": "Andy Man",
                    "email": "andy@bday.test",
                }
            })))
            .mount(&server)
            .await;

        let contact = client(&server, vec![]).lookup("user2-uuid").await.unwrap();
        assert_eq!(contact.email.as_deref(), Some("andy@bday.test"));
        assert_eq!(contact.full_name.as_deref(), Some("Andy Man"));

        let err = client(&server, vec![]).lookup("nobody").await.unwrap_err();
        assert!(matches!(err, NotifyError::Lookup { donor_id, .. } if donor_id == "nobody"));
    }

    #[tokio::test]
    async fn test_lookup_escapes_donor_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/a%2Fb%3Fc%23d"))
            .and(query_param("private", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"email": "odd@bday.test"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let contact = client(&server, vec![]).lookup("a/b?c#d").await.unwrap();
        assert_eq!(contact.email.as_deref(), Some("odd@bday.test"));
    }

    #[tokio::test]
    async fn test_send_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/comms/events"))
            .and(header("authorization", "bearer raisely:raisely-token"))
            .and(body_partial_json(json!({
                "data": {
                    "type": "custom",
                    "version": 1,
                    "data": {"messageType": "lead-lost", "amountToLead": 31.0, "email": "andy@bday.test"}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let event = NotificationEvent {
            event_type: "custom".into(),
            source: "campaign:campaign-uuid".into(),
            created_at: chrono::Utc::now(),
            version: 1,
            data: LeadMessage {
                recipient: Recipient {
                    uuid: "user2-uuid".into(),
                    preferred_name: "Andy".into(),
                    email: Some("andy@bday.test".into()),
                    full_name: None,
                    total: 4000,
                },
                amount_to_lead: 31.0,
                message_type: MessageType::LeadLost,
            },
        };
        client(&server, vec![]).send(&event).await.unwrap();
    }
}
