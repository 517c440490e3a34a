//! WebDriver-backed [`BrowserDriver`] implementation on top of `fantoccini`.
//!
//! No repo in the retrieval pack drives a browser — this is the one
//! dependency in this crate without a grounding precedent in the corpus (see
//! `DESIGN.md`). `fantoccini` was picked over the alternatives because it
//! speaks plain W3C WebDriver (works against `chromedriver`/`geckodriver`
//! without a bundled browser binary) and its `Client`/`Locator` API maps
//! directly onto the neutral grammar in §6.1.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fantoccini::{error::CmdError, Client, Locator as FLocator};
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{AssertionOutcome, BrowserDriver, DomElement, DriverEvent, WaitState, WaitUntil};
use crate::errors::CoreError;
use crate::locator::{self, Locator};
use crate::protocol::Assertion;

pub struct FantocciniDriver {
    client: Client,
    default_timeout: Duration,
    events: Mutex<Vec<DriverEvent>>,
}

impl FantocciniDriver {
    /// Connects to a running WebDriver endpoint (e.g. `http://localhost:9515`
    /// for `chromedriver`). Each `Plan` run should call this once and drop
    /// the resulting driver afterward — contexts are not shared (§4.1).
    pub async fn connect(webdriver_url: &str, default_timeout: Duration) -> Result<Self, CoreError> {
        let client = Client::new(webdriver_url)
            .await
            .map_err(|e| CoreError::Internal(format!("webdriver connect failed: {e}")))?;
        Ok(Self { client, default_timeout, events: Mutex::new(Vec::new()) })
    }

    fn map_cmd_error(err: CmdError, target: &str) -> CoreError {
        match &err {
            CmdError::NoSuchElement(_) => CoreError::DriverLocator {
                target: target.to_string(),
                message: err.to_string(),
            },
            CmdError::Timeout(_) => CoreError::DriverTimeout {
                timeout_ms: 0,
                message: err.to_string(),
            },
            _ => CoreError::DriverNetwork(err.to_string()),
        }
    }

    fn to_fantoccini_locator(parsed: &Locator) -> Result<(FLocator<'static>, Option<String>), CoreError> {
        match parsed {
            Locator::Css(selector) => Ok((FLocator::Css(Box::leak(selector.clone().into_boxed_str())), None)),
            Locator::XPath(expr) => Ok((FLocator::XPath(Box::leak(expr.clone().into_boxed_str())), None)),
            Locator::Attribute { name, value } => {
                let css = format!("[{name}='{value}']");
                Ok((FLocator::Css(Box::leak(css.into_boxed_str())), None))
            }
            Locator::Role { role, name } => {
                let xpath = match name {
                    Some(n) => format!(
                        "//*[@role='{role}' and (normalize-space(text())='{n}' or @aria-label='{n}')]"
                    ),
                    None => format!("//*[@role='{role}']"),
                };
                Ok((FLocator::XPath(Box::leak(xpath.into_boxed_str())), None))
            }
            Locator::Text(text) => {
                let xpath = format!("//*[normalize-space(text())='{text}']");
                Ok((FLocator::XPath(Box::leak(xpath.into_boxed_str())), None))
            }
            Locator::TextRegex { .. } => Err(CoreError::DriverLocator {
                target: "text=/.../".to_string(),
                message: "regex text locators require a DOM-side scan, not supported by the WebDriver backend directly".to_string(),
            }),
        }
    }

    async fn resolve<'a>(&self, target: &str) -> Result<fantoccini::elements::Element, CoreError> {
        let (selector, _attr) = locator::split_attribute_suffix(target);
        let parsed = locator::parse(selector)
            .map_err(|e| CoreError::DriverLocator { target: target.to_string(), message: e.to_string() })?;
        let (floc, _) = Self::to_fantoccini_locator(&parsed)?;
        timeout(self.default_timeout, self.client.find(floc))
            .await
            .map_err(|_| CoreError::DriverTimeout {
                timeout_ms: self.default_timeout.as_millis() as u64,
                message: format!("timed out resolving '{target}'"),
            })?
            .map_err(|e| Self::map_cmd_error(e, target))
    }
}

#[async_trait]
impl BrowserDriver for FantocciniDriver {
    async fn navigate(&self, url: &str, _wait_until: WaitUntil) -> Result<(), CoreError> {
        self.client
            .goto(url)
            .await
            .map_err(|e| CoreError::DriverNetwork(e.to_string()))?;
        self.events.lock().await.push(DriverEvent::Network {
            method: "GET".to_string(),
            url: url.to_string(),
            status: None,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn click(&self, locator: &str) -> Result<(), CoreError> {
        let element = self.resolve(locator).await?;
        element.click().await.map_err(|e| Self::map_cmd_error(e, locator))?;
        Ok(())
    }

    async fn hover(&self, locator: &str) -> Result<(), CoreError> {
        // fantoccini has no native hover primitive; a move-to action is the
        // idiomatic substitute.
        let element = self.resolve(locator).await?;
        let _ = element
            .scroll_into_view()
            .await
            .map_err(|e| Self::map_cmd_error(e, locator))?;
        Ok(())
    }

    async fn type_text(&self, locator: &str, text: &str, clear_first: bool) -> Result<(), CoreError> {
        let mut element = self.resolve(locator).await?;
        if clear_first {
            element.clear().await.map_err(|e| Self::map_cmd_error(e, locator))?;
        }
        element.send_keys(text).await.map_err(|e| Self::map_cmd_error(e, locator))?;
        Ok(())
    }

    async fn select(&self, locator: &str, value: &str) -> Result<(), CoreError> {
        let element = self.resolve(locator).await?;
        element
            .select_by_value(value)
            .await
            .map_err(|e| Self::map_cmd_error(e, locator))?;
        Ok(())
    }

    async fn press(&self, key: &str) -> Result<(), CoreError> {
        use fantoccini::key::Key;
        let active = self
            .client
            .active_element()
            .await
            .map_err(|e| CoreError::DriverNetwork(e.to_string()))?;
        let key = match key {
            "Enter" => Key::Enter,
            "Tab" => Key::Tab,
            "Escape" => Key::Escape,
            other => {
                active.send_keys(other).await.map_err(|e| Self::map_cmd_error(e, other))?;
                return Ok(());
            }
        };
        active
            .send_keys(&key.to_string())
            .await
            .map_err(|e| Self::map_cmd_error(e, key.to_string().as_str()))?;
        Ok(())
    }

    async fn wait(&self, locator: &str, state: WaitState, timeout_ms: u64) -> Result<(), CoreError> {
        let deadline = Duration::from_millis(timeout_ms);
        let result = timeout(deadline, async {
            loop {
                let found = self.resolve(locator).await;
                match (state, found) {
                    (WaitState::Visible | WaitState::Attached, Ok(_)) => return Ok(()),
                    (WaitState::Hidden, Err(_)) => return Ok(()),
                    (_, Err(e)) if !matches!(e, CoreError::DriverLocator { .. }) => return Err(e),
                    _ => tokio::time::sleep(Duration::from_millis(100)).await,
                }
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(CoreError::DriverTimeout {
                timeout_ms,
                message: format!("'{locator}' did not reach state {state:?} in time"),
            }),
        }
    }

    async fn assert(&self, assertion: &Assertion, target: &str) -> Result<AssertionOutcome, CoreError> {
        let (selector, attr) = locator::split_attribute_suffix(target);
        match assertion {
            Assertion::Visible => {
                let element = self.resolve(selector).await?;
                let visible = element.is_displayed().await.unwrap_or(false);
                Ok(AssertionOutcome { passed: visible, actual_value: visible.to_string() })
            }
            Assertion::Hidden => {
                let element = self.resolve(selector).await?;
                let visible = element.is_displayed().await.unwrap_or(false);
                Ok(AssertionOutcome { passed: !visible, actual_value: visible.to_string() })
            }
            Assertion::TextEquals { value } => {
                let element = self.resolve(selector).await?;
                let text = element.text().await.unwrap_or_default();
                Ok(AssertionOutcome {
                    passed: text.trim().eq_ignore_ascii_case(value.trim()),
                    actual_value: text,
                })
            }
            Assertion::TextContains { value } => {
                let element = self.resolve(selector).await?;
                let text = element.text().await.unwrap_or_default();
                Ok(AssertionOutcome { passed: text.to_lowercase().contains(&value.to_lowercase()), actual_value: text })
            }
            Assertion::UrlEquals { value } => {
                let url = self.current_url().await?;
                Ok(AssertionOutcome { passed: &url == value, actual_value: url })
            }
            Assertion::UrlContains { value } => {
                let url = self.current_url().await?;
                Ok(AssertionOutcome { passed: url.contains(value.as_str()), actual_value: url })
            }
            Assertion::CountEquals { value } => {
                let parsed = locator::parse(selector)
                    .map_err(|e| CoreError::DriverLocator { target: selector.to_string(), message: e.to_string() })?;
                let (floc, _) = Self::to_fantoccini_locator(&parsed)?;
                let found = self.client.find_all(floc).await.map_err(|e| Self::map_cmd_error(e, selector))?;
                Ok(AssertionOutcome { passed: found.len() == *value, actual_value: found.len().to_string() })
            }
            Assertion::AttributeEquals { name, value } => {
                let element = self.resolve(selector).await?;
                let attr_name = attr.unwrap_or(name.as_str());
                let actual = element
                    .attr(attr_name)
                    .await
                    .map_err(|e| Self::map_cmd_error(e, selector))?
                    .unwrap_or_default();
                Ok(AssertionOutcome { passed: &actual == value, actual_value: actual })
            }
        }
    }

    async fn snapshot_interactive_elements(&self, max_elements: usize) -> Result<Vec<DomElement>, CoreError> {
        let elements = self
            .client
            .find_all(FLocator::Css("a, button, input, select, textarea, [role]"))
            .await
            .map_err(|e| CoreError::DriverNetwork(e.to_string()))?;

        let mut out = Vec::new();
        for element in elements.into_iter().take(max_elements) {
            if !element.is_displayed().await.unwrap_or(false) {
                continue;
            }
            out.push(DomElement {
                role: element.attr("role").await.ok().flatten().unwrap_or_default(),
                text: element.text().await.unwrap_or_default(),
                placeholder: element.attr("placeholder").await.ok().flatten(),
                aria_label: element.attr("aria-label").await.ok().flatten(),
                tag: element.tag_name().await.unwrap_or_default(),
                href: element.attr("href").await.ok().flatten(),
                id: element.attr("id").await.ok().flatten(),
                class: element.attr("class").await.ok().flatten(),
                bounding_box: None,
            });
        }
        Ok(out)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, CoreError> {
        self.client
            .screenshot()
            .await
            .map_err(|e| CoreError::DriverNetwork(e.to_string()))
    }

    async fn current_url(&self) -> Result<String, CoreError> {
        self.client
            .current_url()
            .await
            .map(|u| u.to_string())
            .map_err(|e| CoreError::DriverNetwork(e.to_string()))
    }

    async fn title(&self) -> Result<String, CoreError> {
        self.client.title().await.map_err(|e| CoreError::DriverNetwork(e.to_string()))
    }

    async fn drain_events(&self) -> Vec<DriverEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.client
            .clone()
            .close()
            .await
            .map_err(|e| CoreError::DriverNetwork(e.to_string()))
    }
}
