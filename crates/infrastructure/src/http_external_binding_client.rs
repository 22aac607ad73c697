use async_trait::async_trait;
use grantwarden_application::{ExternalApiError, ExternalBindingClient};
use grantwarden_domain::{BindingRef, ResourceId, Subject};
use serde::{Deserialize, Serialize};

const RESOURCE_PREFIX: &str = "properties/";
const LIST_PAGE_SIZE: u32 = 200;

/// Access-binding client for an analytics admin style REST API.
///
/// Bindings live under `{base}/properties/{id}/accessBindings` and are deleted
/// by their full resource name.
pub struct HttpExternalBindingClient {
    http_client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl HttpExternalBindingClient {
    /// Creates a client for the API rooted at `base_url`.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_token: api_token.into(),
        }
    }

    fn bindings_url(&self, resource_id: &ResourceId) -> String {
        format!(
            "{}/{}/accessBindings",
            self.base_url,
            resource_path(resource_id)
        )
    }

    async fn list_page(
        &self,
        resource_id: &ResourceId,
        page_token: Option<&str>,
    ) -> Result<AccessBindingPage, ExternalApiError> {
        let page_size = LIST_PAGE_SIZE.to_string();
        let mut params = vec![("pageSize", page_size.as_str())];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token));
        }
        let url = reqwest::Url::parse_with_params(self.bindings_url(resource_id).as_str(), &params)
            .map_err(|error| {
                ExternalApiError::transport(format!(
                    "invalid access binding url for '{resource_id}': {error}"
                ))
            })?;

        let request = self
            .http_client
            .get(url)
            .bearer_auth(self.api_token.as_str());

        let response = request.send().await.map_err(transport_error)?;
        let response = ensure_success(response, "list access bindings").await?;

        response
            .json::<AccessBindingPage>()
            .await
            .map_err(|error| {
                ExternalApiError::transport(format!(
                    "failed to decode access binding list for '{resource_id}': {error}"
                ))
            })
    }
}

#[derive(Debug, Serialize)]
struct CreateAccessBindingRequest<'a> {
    user: &'a str,
    roles: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct AccessBinding {
    name: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessBindingPage {
    #[serde(default)]
    access_bindings: Vec<AccessBinding>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[async_trait]
impl ExternalBindingClient for HttpExternalBindingClient {
    async fn create(
        &self,
        resource_id: &ResourceId,
        subject: &Subject,
        external_role_id: &str,
    ) -> Result<BindingRef, ExternalApiError> {
        let response = self
            .http_client
            .post(self.bindings_url(resource_id))
            .bearer_auth(self.api_token.as_str())
            .json(&CreateAccessBindingRequest {
                user: subject.as_str(),
                roles: [external_role_id],
            })
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response, "create access binding").await?;

        let binding = response.json::<AccessBinding>().await.map_err(|error| {
            ExternalApiError::transport(format!(
                "failed to decode created access binding for '{subject}': {error}"
            ))
        })?;

        binding_ref(binding.name)
    }

    async fn find(
        &self,
        subject: &Subject,
        resource_id: &ResourceId,
    ) -> Result<Option<BindingRef>, ExternalApiError> {
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(resource_id, page_token.as_deref()).await?;
            if let Some(name) = find_binding_name(&page, subject) {
                return binding_ref(name).map(Some);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(None),
            }
        }
    }

    async fn delete(&self, binding_ref: &BindingRef) -> Result<(), ExternalApiError> {
        let response = self
            .http_client
            .delete(format!("{}/{}", self.base_url, binding_ref.as_str()))
            .bearer_auth(self.api_token.as_str())
            .send()
            .await
            .map_err(transport_error)?;
        ensure_success(response, "delete access binding").await?;

        Ok(())
    }
}

fn resource_path(resource_id: &ResourceId) -> String {
    let value = resource_id.as_str();
    if value.starts_with(RESOURCE_PREFIX) {
        value.to_owned()
    } else {
        format!("{RESOURCE_PREFIX}{value}")
    }
}

fn find_binding_name(page: &AccessBindingPage, subject: &Subject) -> Option<String> {
    page.access_bindings
        .iter()
        .find(|binding| {
            binding
                .user
                .as_deref()
                .is_some_and(|user| user.eq_ignore_ascii_case(subject.as_str()))
        })
        .map(|binding| binding.name.clone())
}

fn binding_ref(name: String) -> Result<BindingRef, ExternalApiError> {
    BindingRef::new(name).map_err(|error| {
        ExternalApiError::transport(format!("access binding has no usable name: {error}"))
    })
}

fn transport_error(error: reqwest::Error) -> ExternalApiError {
    match error.status() {
        Some(status) => ExternalApiError::with_status(status.as_u16(), error.to_string()),
        None => ExternalApiError::transport(format!("access binding request failed: {error}")),
    }
}

async fn ensure_success(
    response: reqwest::Response,
    operation: &str,
) -> Result<reqwest::Response, ExternalApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<response body unavailable>".to_owned());

    Err(ExternalApiError::with_status(
        status.as_u16(),
        format!("{operation} failed: {body}"),
    ))
}
