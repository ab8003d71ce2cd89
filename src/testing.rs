//! Scripted transport and page fixtures for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use crate::config::PortalConfig;
use crate::credentials::Credentials;
use crate::error::{FsError, Result};
use crate::parser::IliasParser;
use crate::session::{PortalResponse, Session, Transport};

pub const BASE: &str = "https://ilias.studium.kit.edu/";
pub const COURSE_HREF: &str =
    "ilias.php?ref_id=100&cmdClass=ilrepositorygui&cmd=frameset&baseClass=ilrepositorygui";
pub const FOLDER_HREF: &str =
    "ilias.php?ref_id=200&cmd=view&cmdClass=ilobjfoldergui&baseClass=ilRepositoryGUI";
pub const FORUM_HREF: &str = "ilias.php?ref_id=400&cmdClass=ilobjforumgui&cmd=showThreads";
pub const FILE_HREF: &str =
    "https://ilias.studium.kit.edu/goto.php?target=file_300_download&client_id=produktiv";
pub const NOTES_HREF: &str =
    "https://ilias.studium.kit.edu/goto.php?target=file_301_download&client_id=produktiv";

pub fn absolute(href: &str) -> String {
    format!("{}{}", BASE, href)
}

pub fn item(name: &str, href: &str, properties: &[&str]) -> String {
    let properties: String = properties
        .iter()
        .map(|p| format!(r#"<span class="il_ItemProperty"> {} </span>"#, p))
        .collect();
    format!(
        r#"<div class="il_ContainerListItem">
             <div class="il_ContainerListItemTitle"><a class="il_ContainerItemTitle" href="{}">{}</a></div>
             <div class="il_ItemProperties">{}</div>
           </div>"#,
        href, name, properties
    )
}

pub fn page(items: &[String]) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>ILIAS</title></head><body><div id=\"il_center_col\">{}</div></body></html>",
        items.concat()
    )
}

pub fn listing_page() -> String {
    page(&[
        item("Course A", COURSE_HREF, &[]),
        item("Exercises", FOLDER_HREF, &[]),
        item("Slides 1/2", FILE_HREF, &["pdf", "2,5 MB", "12. Okt 2016, 14:03"]),
        item("Forum", FORUM_HREF, &[]),
    ])
}

pub fn course_page() -> String {
    page(&[
        item("Week 1", FOLDER_HREF, &[]),
        item("Notes", NOTES_HREF, &["txt", "20 Bytes", "Version: 2", "gestern, 09:00"]),
    ])
}

pub fn otp_page() -> String {
    r#"<html><body>
        <form action="/idp/profile/SAML2/Redirect/SSO?execution=e1s2" method="post">
          <div><p><input name="j_tokenNumber" type="text"></p></div>
          <button name="_eventId_proceed">Login</button>
        </form>
    </body></html>"#
        .to_string()
}

pub fn assertion_page() -> String {
    r#"<html><body onload="document.forms[0].submit()">
        <form action="https://ilias.studium.kit.edu/Shibboleth.sso/SAML2/POST" method="post">
          <input type="hidden" name="RelayState" value="ss:mem:42"/>
          <input type="hidden" name="SAMLResponse" value="PHNhbWw+"/>
        </form>
    </body></html>"#
        .to_string()
}

pub fn test_credentials() -> Credentials {
    Credentials {
        username: "ab1234".into(),
        password: "secret".into(),
    }
}

pub fn mock_session(transport: Arc<MockTransport>, ttl: Duration) -> Arc<Session> {
    Arc::new(Session::new(
        transport,
        Arc::new(IliasParser::new().unwrap()),
        PortalConfig::default(),
        test_credentials(),
        ttl,
    ))
}

#[derive(Debug, Clone)]
enum Scripted {
    Page(Bytes),
    Redirect,
    Fail,
}

/// Transport answering from per-URL scripts.
///
/// GET scripts are consumed front to back; the last step repeats forever.
#[derive(Default)]
pub struct MockTransport {
    gets: Mutex<HashMap<String, VecDeque<Scripted>>>,
    posts: Mutex<HashMap<String, (String, String)>>,
    get_log: Mutex<Vec<String>>,
    post_log: Mutex<Vec<(String, Vec<(String, String)>)>>,
    resets: AtomicUsize,
}

impl MockTransport {
    pub const IDP_LOGIN: &'static str =
        "https://idp.scc.kit.edu/idp/profile/SAML2/Redirect/SSO?execution=e1s1";

    /// Scripts a login handshake that succeeds without a passcode.
    pub fn with_login() -> Self {
        let transport = Self::default();
        let portal = PortalConfig::default();
        transport.on_post(&portal.login_url, Self::IDP_LOGIN, "<html>login form</html>");
        transport.on_post(Self::IDP_LOGIN, Self::IDP_LOGIN, &assertion_page());
        transport.on_post(
            "https://idp.scc.kit.edu/idp/profile/SAML2/Redirect/SSO?execution=e1s2",
            Self::IDP_LOGIN,
            &assertion_page(),
        );
        transport.on_post(&portal.assertion_url, BASE, "<html>welcome</html>");
        transport
    }

    fn script(&self, url: &str, step: Scripted) {
        self.gets
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(step);
    }

    pub fn on_get(&self, url: &str, body: &[u8]) {
        self.script(url, Scripted::Page(Bytes::copy_from_slice(body)));
    }

    pub fn on_get_redirect(&self, url: &str) {
        self.script(url, Scripted::Redirect);
    }

    pub fn fail_get(&self, url: &str) {
        self.script(url, Scripted::Fail);
    }

    /// POSTs to `url` answer with `body`, reporting `final_url` as the landing page.
    pub fn on_post(&self, url: &str, final_url: &str, body: &str) {
        self.posts
            .lock()
            .insert(url.to_string(), (final_url.to_string(), body.to_string()));
    }

    pub fn posts(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.post_log.lock().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn login_attempts(&self) -> usize {
        let login_url = PortalConfig::default().login_url;
        self.post_log
            .lock()
            .iter()
            .filter(|(url, _)| *url == login_url)
            .count()
    }

    pub fn gets_of(&self, url: &str) -> usize {
        self.get_log.lock().iter().filter(|u| *u == url).count()
    }

    pub fn get_count(&self) -> usize {
        self.get_log.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> Result<PortalResponse> {
        tokio::task::yield_now().await;
        self.get_log.lock().push(url.to_string());

        let step = {
            let mut gets = self.gets.lock();
            let queue = gets
                .get_mut(url)
                .ok_or_else(|| FsError::Network(format!("connection refused: {}", url)))?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };

        match step {
            Some(Scripted::Page(body)) => Ok(PortalResponse {
                url: url.to_string(),
                status: 200,
                is_redirect: false,
                body,
            }),
            Some(Scripted::Redirect) => Ok(PortalResponse {
                url: url.to_string(),
                status: 302,
                is_redirect: true,
                body: Bytes::new(),
            }),
            Some(Scripted::Fail) | None => {
                Err(FsError::Network(format!("operation timed out: {}", url)))
            }
        }
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<PortalResponse> {
        tokio::task::yield_now().await;
        self.post_log.lock().push((url.to_string(), form.to_vec()));

        let (final_url, body) = self
            .posts
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| FsError::Network(format!("connection refused: {}", url)))?;
        Ok(PortalResponse {
            url: final_url,
            status: 200,
            is_redirect: false,
            body: Bytes::from(body),
        })
    }

    fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
