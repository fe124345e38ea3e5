use reqwest::header::COOKIE;
use tracing::{info, warn};

use crate::auth::PortalClient;
use crate::error::{AuthError, FetchError};
use crate::extract;
use crate::models::{Credentials, RunReport, StudentRecord};

/// The two portal interactions a profile fetch depends on, split out so the
/// re-login discipline can be exercised without a live portal.
pub(crate) trait PortalSession {
    async fn login(&self) -> Result<Credentials, AuthError>;
    async fn profile_page(
        &self,
        creds: &Credentials,
        username: &str,
    ) -> Result<(String, String), FetchError>;
}

impl PortalSession for PortalClient {
    async fn login(&self) -> Result<Credentials, AuthError> {
        self.authenticate().await
    }

    async fn profile_page(
        &self,
        creds: &Credentials,
        username: &str,
    ) -> Result<(String, String), FetchError> {
        let transport = |source: reqwest::Error| FetchError::Transport {
            username: username.to_string(),
            source,
        };

        let response = self
            .http
            .get(self.config.profile_url(username))
            .header(
                COOKIE,
                format!("user.id={}; _session_id={}", creds.user_id, creds.session_id),
            )
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                username: username.to_string(),
                status,
            });
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(transport)?;
        Ok((final_url, body))
    }
}

impl PortalClient {
    /// Fetches one student's profile page. A login page served under HTTP 200
    /// means the session expired; that triggers exactly one re-login and one
    /// refetch, after which a second soft failure is fatal for this student.
    pub async fn fetch_profile(
        &self,
        creds: &mut Credentials,
        username: &str,
    ) -> Result<String, FetchError> {
        fetch_profile_via(self, creds, username).await
    }

    /// Scrapes every listed student in order, one at a time, with the
    /// configured politeness delay between requests. A failed student is
    /// recorded in the report and skipped; only authentication failure at the
    /// start aborts the whole run.
    pub async fn scrape_students(
        &self,
        usernames: &[String],
    ) -> anyhow::Result<(Vec<StudentRecord>, RunReport)> {
        let mut creds = self.authenticate().await?;
        let mut records = Vec::with_capacity(usernames.len());
        let mut report = RunReport::default();

        for (index, username) in usernames.iter().enumerate() {
            match self.fetch_profile(&mut creds, username).await {
                Ok(page) => {
                    records.push(extract::extract(&page, username));
                    report.scraped += 1;
                    info!(
                        username,
                        fetched = index + 1,
                        total = usernames.len(),
                        "profile scraped"
                    );
                }
                Err(err) => {
                    warn!(username, error = %err, "skipping student");
                    report.skip(username, &err);
                }
            }

            if index + 1 < usernames.len() {
                tokio::time::sleep(self.config.delay).await;
            }
        }

        Ok((records, report))
    }
}

async fn fetch_profile_via<S: PortalSession>(
    session: &S,
    creds: &mut Credentials,
    username: &str,
) -> Result<String, FetchError> {
    let (final_url, body) = session.profile_page(creds, username).await?;
    if !looks_like_login_page(&final_url, &body) {
        return Ok(body);
    }

    warn!(username, "redirected to login page, refreshing session");
    *creds = session.login().await?;

    let (final_url, body) = session.profile_page(creds, username).await?;
    if looks_like_login_page(&final_url, &body) {
        return Err(FetchError::SessionExpired {
            username: username.to_string(),
        });
    }
    Ok(body)
}

/// Session-expiry detection: the portal answers expired cookies with an HTTP
/// 200 login page instead of a 401.
fn looks_like_login_page(final_url: &str, body: &str) -> bool {
    if final_url.to_lowercase().contains("login") {
        return true;
    }
    let head: String = body.chars().take(500).collect::<String>().to_lowercase();
    head.contains("sign in")
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use super::*;

    /// Serves a queued sequence of (final_url, body) pages and counts logins.
    struct ScriptedSession {
        pages: RefCell<VecDeque<(String, String)>>,
        logins: Cell<usize>,
    }

    impl ScriptedSession {
        fn new(pages: Vec<(String, String)>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                logins: Cell::new(0),
            }
        }
    }

    impl PortalSession for ScriptedSession {
        async fn login(&self) -> Result<Credentials, AuthError> {
            self.logins.set(self.logins.get() + 1);
            Ok(Credentials {
                user_id: "u1".to_string(),
                session_id: format!("refreshed-{}", self.logins.get()),
            })
        }

        async fn profile_page(
            &self,
            _creds: &Credentials,
            _username: &str,
        ) -> Result<(String, String), FetchError> {
            Ok(self.pages.borrow_mut().pop_front().unwrap())
        }
    }

    fn login_page() -> (String, String) {
        (
            "https://portal.example/login?service=x".to_string(),
            "<html><head><title>Sign In</title></head></html>".to_string(),
        )
    }

    fn profile_page() -> (String, String) {
        (
            "https://portal.example/users/moreira_t".to_string(),
            "<html><body><h1>moreira_t</h1></body></html>".to_string(),
        )
    }

    fn stale_creds() -> Credentials {
        Credentials {
            user_id: "u1".to_string(),
            session_id: "stale".to_string(),
        }
    }

    #[tokio::test]
    async fn fresh_session_fetches_without_relogin() {
        let session = ScriptedSession::new(vec![profile_page()]);
        let mut creds = stale_creds();

        let body = fetch_profile_via(&session, &mut creds, "moreira_t")
            .await
            .unwrap();
        assert!(body.contains("moreira_t"));
        assert_eq!(session.logins.get(), 0);
        assert_eq!(creds.session_id, "stale");
    }

    #[tokio::test]
    async fn expired_session_relogs_in_exactly_once() {
        let session = ScriptedSession::new(vec![login_page(), profile_page()]);
        let mut creds = stale_creds();

        let body = fetch_profile_via(&session, &mut creds, "moreira_t")
            .await
            .unwrap();
        assert!(body.contains("moreira_t"));
        assert_eq!(session.logins.get(), 1);
        assert_eq!(creds.session_id, "refreshed-1");
    }

    #[tokio::test]
    async fn second_login_page_is_fatal() {
        let session = ScriptedSession::new(vec![login_page(), login_page()]);
        let mut creds = stale_creds();

        let err = fetch_profile_via(&session, &mut creds, "moreira_t")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::SessionExpired { ref username } if username == "moreira_t"
        ));
        // one refresh, never a second
        assert_eq!(session.logins.get(), 1);
    }

    #[test]
    fn login_url_is_a_soft_failure() {
        assert!(looks_like_login_page(
            "https://portal.example/login?service=x",
            "<html></html>"
        ));
    }

    #[test]
    fn sign_in_body_is_a_soft_failure() {
        let body = "<html><head><title>Sign In</title></head><body></body></html>";
        assert!(looks_like_login_page("https://portal.example/users/a_b", body));
    }

    #[test]
    fn profile_page_is_not_a_soft_failure() {
        let body = "<html><body><h1>moreira_t</h1></body></html>";
        assert!(!looks_like_login_page("https://portal.example/users/moreira_t", body));
    }

    #[test]
    fn sign_in_marker_only_checked_in_body_head() {
        let body = format!("{}sign in", "x".repeat(600));
        assert!(!looks_like_login_page("https://portal.example/users/a_b", &body));
    }
}
