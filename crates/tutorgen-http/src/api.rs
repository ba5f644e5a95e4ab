use chrono::{Duration, Utc};
use tracing::{info, instrument};
use tutorgen_protocol::{
    ApiRequest, ClientError, ClientResult, GenerationOptions, GenerationStatusResponse,
    LoginRequest, LoginResponse, RefreshResponse, Session, SubmitGenerationRequest,
    SubmitGenerationResponse,
};
use tutorgen_store::SessionStore;

use crate::ApiClient;

/// Endpoint paths relative to the API root.
pub mod paths {
    pub const LOGIN: &str = "/user/login";
    pub const REFRESH: &str = "/user/refresh";
    pub const SUBMIT_GENERATION: &str = "/repo";
    pub const GENERATION_STATUS: &str = "/tutorial/generation/status";
}

/// Typed calls for the endpoints the client core consumes.
#[derive(Clone)]
pub struct BackendApi {
    client: ApiClient,
    default_token_ttl: Duration,
}

impl BackendApi {
    pub fn new(client: ApiClient, default_token_ttl: Duration) -> Self {
        Self {
            client,
            default_token_ttl,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn session(&self) -> &SessionStore {
        self.client.session()
    }

    /// Exchange credentials for a token and establish the session.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<Session> {
        let body = serde_json::to_value(LoginRequest {
            email: email.to_owned(),
            password: password.to_owned(),
        })
        .map_err(|err| ClientError::Decode(err.to_string()))?;

        let response: LoginResponse = self
            .client
            .send(ApiRequest::post(paths::LOGIN, Some(body)))
            .await?;
        if !response.token_type.eq_ignore_ascii_case("bearer") {
            return Err(ClientError::Decode(format!(
                "unsupported token type: {}",
                response.token_type
            )));
        }

        let expiry = response
            .expiry
            .unwrap_or_else(|| Utc::now() + self.default_token_ttl);
        self.session()
            .login(response.user, response.access_token, expiry)
            .await?;
        info!(%expiry, "logged in");
        Ok(self.session().snapshot())
    }

    /// Local teardown; the backend keeps no server-side session.
    pub async fn logout(&self) {
        self.session().logout().await;
    }

    pub async fn refresh_token(&self) -> ClientResult<RefreshResponse> {
        self.client
            .send(ApiRequest::post(paths::REFRESH, None))
            .await
    }

    /// Renew the credential and store it in the session.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> ClientResult<Session> {
        let renewed = self.refresh_token().await?;
        self.session()
            .refresh(renewed.access_token, renewed.expiry)
            .await?;
        Ok(self.session().snapshot())
    }

    #[instrument(skip(self, options))]
    pub async fn submit_generation(
        &self,
        github_url: &str,
        options: GenerationOptions,
    ) -> ClientResult<SubmitGenerationResponse> {
        let body = serde_json::to_value(SubmitGenerationRequest {
            github_url: github_url.to_owned(),
            options,
        })
        .map_err(|err| ClientError::Decode(err.to_string()))?;
        self.client
            .send(ApiRequest::post(paths::SUBMIT_GENERATION, Some(body)))
            .await
    }

    pub async fn generation_status(
        &self,
        repo_url: &str,
    ) -> ClientResult<GenerationStatusResponse> {
        let request = ApiRequest::get(paths::GENERATION_STATUS).with_query("repo_url", repo_url);
        self.client.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::json;
    use tutorgen_protocol::{ClientError, Difficulty, GenerationOptions, HttpMethod};
    use tutorgen_store::SessionStore;

    use crate::fake::{CountingNavigator, ScriptedTransport};
    use crate::{ApiClient, BackendApi, paths};

    fn api(transport: &ScriptedTransport) -> BackendApi {
        let client = ApiClient::new(
            Arc::new(transport.clone()),
            SessionStore::in_memory(),
            Arc::new(CountingNavigator::default()),
        );
        BackendApi::new(client, Duration::days(7))
    }

    #[tokio::test]
    async fn login_establishes_session_with_default_lifetime() {
        let transport = ScriptedTransport::new();
        transport.respond_json(
            HttpMethod::Post,
            paths::LOGIN,
            200,
            json!({
                "access_token": "jwt",
                "token_type": "bearer",
                "user": {"id": 3, "email": "ada@example.com"}
            }),
        );
        let api = api(&transport);

        let before = Utc::now();
        let session = api.login("ada@example.com", "pw").await.unwrap();
        assert!(session.is_authenticated);
        assert_eq!(session.bearer(), Some("jwt"));
        let expiry = session.token_expiry.unwrap();
        assert!(expiry >= before + Duration::days(7));
        assert!(expiry <= Utc::now() + Duration::days(7));

        let sent = transport.sent();
        let body = sent[0].request.body.clone().unwrap();
        assert_eq!(body, json!({"email": "ada@example.com", "password": "pw"}));
    }

    #[tokio::test]
    async fn login_prefers_server_expiry() {
        let transport = ScriptedTransport::new();
        let expiry = Utc::now() + Duration::minutes(15);
        transport.respond_json(
            HttpMethod::Post,
            paths::LOGIN,
            200,
            json!({
                "access_token": "jwt",
                "token_type": "bearer",
                "user": {"id": 3, "email": "ada@example.com"},
                "expiry": expiry,
            }),
        );
        let session = api(&transport).login("ada@example.com", "pw").await.unwrap();
        assert_eq!(session.token_expiry, Some(expiry));
    }

    #[tokio::test]
    async fn bad_credentials_surface_backend_message() {
        let transport = ScriptedTransport::new();
        transport.respond_json(
            HttpMethod::Post,
            paths::LOGIN,
            401,
            json!({"detail": "Incorrect email or password"}),
        );
        let api = api(&transport);
        let err = api.login("ada@example.com", "nope").await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Rejected {
                status: 401,
                message: "Incorrect email or password".into()
            }
        );
        assert!(!api.session().is_authenticated());
    }

    #[tokio::test]
    async fn refresh_session_swaps_credential() {
        let transport = ScriptedTransport::new();
        let renewed = Utc::now() + Duration::hours(2);
        transport.respond_json(
            HttpMethod::Post,
            paths::REFRESH,
            200,
            json!({"access_token": "jwt-2", "expiry": renewed}),
        );
        let api = api(&transport);
        api.session()
            .login(
                serde_json::from_value(json!({"id": 1, "email": "a@b.c"})).unwrap(),
                "jwt-1",
                Utc::now() + Duration::minutes(1),
            )
            .await
            .unwrap();

        let session = api.refresh_session().await.unwrap();
        assert_eq!(session.bearer(), Some("jwt-2"));
        assert_eq!(session.token_expiry, Some(renewed));
        let sent = transport.sent();
        assert_eq!(sent[0].request.header("authorization"), Some("Bearer jwt-1"));
    }

    #[tokio::test]
    async fn status_query_carries_repo_url() {
        let transport = ScriptedTransport::new();
        transport.respond_json(
            HttpMethod::Get,
            paths::GENERATION_STATUS,
            200,
            json!({"isGenerating": true, "generationStep": 1, "generationProgress": 10}),
        );
        let api = api(&transport);
        let status = api
            .generation_status("https://github.com/a/b")
            .await
            .unwrap();
        assert_eq!(status.generation_progress, 10);
        assert_eq!(
            transport.sent()[0].request.query,
            vec![("repo_url".to_owned(), "https://github.com/a/b".to_owned())]
        );
    }

    #[tokio::test]
    async fn submission_sends_options() {
        let transport = ScriptedTransport::new();
        transport.respond_json(
            HttpMethod::Post,
            paths::SUBMIT_GENERATION,
            200,
            json!({"generationId": "g-1"}),
        );
        let api = api(&transport);
        let options = GenerationOptions {
            difficulty: Difficulty::Intermediate,
            focus_areas: vec!["tests".into()],
            description: Some("focus on the parser".into()),
        };
        let response = api
            .submit_generation("https://github.com/a/b", options)
            .await
            .unwrap();
        assert_eq!(response.generation_id.as_deref(), Some("g-1"));
        let body = transport.sent()[0].request.body.clone().unwrap();
        assert_eq!(body["difficulty"], "intermediate");
        assert_eq!(body["description"], "focus on the parser");
    }
}
