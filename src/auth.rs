use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::redirect::Policy;
use scraper::{Html, Selector};

use crate::config::ScrapeConfig;
use crate::error::AuthError;
use crate::models::Credentials;

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.14; rv:109.0) Gecko/20100101 Firefox/110.0";

/// HTTP client for the learning portal. Holds one client with redirects
/// disabled (the CAS handshake inspects redirects manually) and one regular
/// client for profile pages.
pub struct PortalClient {
    pub(crate) auth_http: reqwest::Client,
    pub(crate) http: reqwest::Client,
    pub(crate) config: ScrapeConfig,
}

impl PortalClient {
    pub fn new(config: ScrapeConfig) -> anyhow::Result<Self> {
        let auth_http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::none())
            .build()?;
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            auth_http,
            http,
            config,
        })
    }

    /// Runs the multi-hop CAS login flow and returns the identity cookies.
    ///
    /// The identity provider does not answer the credential POST with an HTTP
    /// redirect; it returns a "click here if not redirected" page whose anchor
    /// carries the service callback URL. Each hop is validated and any missing
    /// token aborts with the name of what was absent.
    pub async fn authenticate(&self) -> Result<Credentials, AuthError> {
        // 1. Provisional session cookie from the service-provider login page.
        let resp = self.auth_http.get(self.config.login_url()).send().await?;
        let provisional_session = cookie_value(resp.headers(), "_session_id")
            .ok_or(AuthError::MissingToken("provisional _session_id cookie"))?;

        // 2. CSRF token, one-time login ticket and IdP session cookie.
        let resp = self
            .auth_http
            .get(self.config.cas_login_url())
            .query(&[("service", self.config.service_url())])
            .send()
            .await?;
        let cas_session = cookie_value(resp.headers(), "_appcas_session")
            .ok_or(AuthError::MissingToken("_appcas_session cookie"))?;
        let body = resp.text().await?;
        let csrf_token =
            extract_csrf_token(&body).ok_or(AuthError::MissingToken("csrf-token meta tag"))?;
        let login_ticket =
            extract_login_ticket(&body).ok_or(AuthError::MissingToken("lt hidden input"))?;

        // 3. Credential POST, without following redirects.
        let service = self.config.service_url();
        let form = [
            ("authenticity_token", csrf_token.as_str()),
            ("lt", login_ticket.as_str()),
            ("service", service.as_str()),
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];
        let resp = self
            .auth_http
            .post(self.config.cas_login_url())
            .header(COOKIE, format!("_appcas_session={cas_session}"))
            .form(&form)
            .send()
            .await?;
        let body = resp.text().await?;

        // 4. The service callback URL lives in the response body's anchor.
        let redirect_url =
            extract_anchor_href(&body).ok_or(AuthError::MissingToken("redirect anchor"))?;

        // 5. Follow the callback with the provisional SP cookie to mint the
        //    final identity cookies.
        let resp = self
            .auth_http
            .get(&redirect_url)
            .header(COOKIE, format!("_session_id={provisional_session}"))
            .send()
            .await?;
        let user_id = cookie_value(resp.headers(), "user.id")
            .ok_or(AuthError::MissingToken("user.id cookie"))?;
        let session_id = cookie_value(resp.headers(), "_session_id")
            .ok_or(AuthError::MissingToken("final _session_id cookie"))?;

        Ok(Credentials {
            user_id,
            session_id,
        })
    }
}

fn cookie_value(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| match_cookie(raw, name))
}

fn match_cookie(raw: &str, name: &str) -> Option<String> {
    let pair = raw.split(';').next()?;
    let (key, value) = pair.split_once('=')?;
    (key.trim() == name).then(|| value.trim().to_string())
}

fn extract_csrf_token(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse(r#"meta[name="csrf-token"]"#).unwrap();
    document
        .select(&selector)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(str::to_string)
}

fn extract_login_ticket(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse(r#"input[name="lt"]"#).unwrap();
    document
        .select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
}

fn extract_anchor_href(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("a[href]").unwrap();
    document
        .select(&selector)
        .next()
        .and_then(|anchor| anchor.value().attr("href"))
        .map(str::to_string)
}
