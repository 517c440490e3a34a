//! Deterministic [`BrowserDriver`] test double. No real browser, no network
//! I/O — a locator either resolves against a small in-memory element table
//! or it doesn't, and callers script both outcomes up front. This is the
//! driver every other component's unit tests run against (executor,
//! resolver, analyser) so none of them depend on a live WebDriver session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{AssertionOutcome, BrowserDriver, DomElement, DriverEvent, WaitState, WaitUntil};
use crate::errors::CoreError;
use crate::protocol::Assertion;

#[derive(Debug, Clone)]
pub struct MockElement {
    pub text: String,
    pub visible: bool,
    pub attributes: HashMap<String, String>,
}

impl MockElement {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), visible: true, attributes: HashMap::new() }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

pub struct MockBrowserDriver {
    elements: RwLock<HashMap<String, MockElement>>,
    fail_locators: RwLock<std::collections::HashSet<String>>,
    current_url: RwLock<String>,
    title: RwLock<String>,
    events: RwLock<Vec<DriverEvent>>,
    screenshot_calls: AtomicUsize,
    closed: AtomicBool,
}

impl Default for MockBrowserDriver {
    fn default() -> Self {
        Self {
            elements: RwLock::new(HashMap::new()),
            fail_locators: RwLock::new(std::collections::HashSet::new()),
            current_url: RwLock::new(String::new()),
            title: RwLock::new(String::new()),
            events: RwLock::new(Vec::new()),
            screenshot_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }
}

impl MockBrowserDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_element(&self, locator: impl Into<String>, element: MockElement) {
        self.elements.write().await.insert(locator.into(), element);
    }

    /// Marks a locator as resolvable to zero elements, forcing a
    /// `driver.locator` error the next time it is used.
    pub async fn fail_locator(&self, locator: impl Into<String>) {
        self.fail_locators.write().await.insert(locator.into());
    }

    pub fn screenshot_call_count(&self) -> usize {
        self.screenshot_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn resolve(&self, locator: &str) -> Result<MockElement, CoreError> {
        if self.fail_locators.read().await.contains(locator) {
            return Err(CoreError::DriverLocator {
                target: locator.to_string(),
                message: "no visible element matched".to_string(),
            });
        }
        self.elements
            .read()
            .await
            .get(locator)
            .cloned()
            .ok_or_else(|| CoreError::DriverLocator {
                target: locator.to_string(),
                message: "no visible element matched".to_string(),
            })
    }
}

#[async_trait]
impl BrowserDriver for MockBrowserDriver {
    async fn navigate(&self, url: &str, _wait_until: WaitUntil) -> Result<(), CoreError> {
        *self.current_url.write().await = url.to_string();
        self.events.write().await.push(DriverEvent::Network {
            method: "GET".to_string(),
            url: url.to_string(),
            status: Some(200),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn click(&self, locator: &str) -> Result<(), CoreError> {
        self.resolve(locator).await.map(|_| ())
    }

    async fn hover(&self, locator: &str) -> Result<(), CoreError> {
        self.resolve(locator).await.map(|_| ())
    }

    async fn type_text(&self, locator: &str, _text: &str, _clear_first: bool) -> Result<(), CoreError> {
        self.resolve(locator).await.map(|_| ())
    }

    async fn select(&self, locator: &str, _value: &str) -> Result<(), CoreError> {
        self.resolve(locator).await.map(|_| ())
    }

    async fn press(&self, _key: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn wait(&self, locator: &str, state: WaitState, _timeout_ms: u64) -> Result<(), CoreError> {
        let element = self.resolve(locator).await?;
        match state {
            WaitState::Visible if !element.visible => Err(CoreError::DriverTimeout {
                timeout_ms: _timeout_ms,
                message: format!("'{locator}' never became visible"),
            }),
            WaitState::Hidden if element.visible => Err(CoreError::DriverTimeout {
                timeout_ms: _timeout_ms,
                message: format!("'{locator}' never became hidden"),
            }),
            _ => Ok(()),
        }
    }

    async fn assert(&self, assertion: &Assertion, target: &str) -> Result<AssertionOutcome, CoreError> {
        let (selector, attr) = crate::locator::split_attribute_suffix(target);
        match assertion {
            Assertion::Visible => {
                let element = self.resolve(selector).await?;
                Ok(AssertionOutcome { passed: element.visible, actual_value: element.visible.to_string() })
            }
            Assertion::Hidden => {
                let element = self.resolve(selector).await?;
                Ok(AssertionOutcome { passed: !element.visible, actual_value: element.visible.to_string() })
            }
            Assertion::TextEquals { value } => {
                let element = self.resolve(selector).await?;
                let actual = element.text.trim().to_string();
                Ok(AssertionOutcome {
                    passed: actual.eq_ignore_ascii_case(value.trim()),
                    actual_value: actual,
                })
            }
            Assertion::TextContains { value } => {
                let element = self.resolve(selector).await?;
                Ok(AssertionOutcome {
                    passed: element.text.to_lowercase().contains(&value.to_lowercase()),
                    actual_value: element.text.clone(),
                })
            }
            Assertion::UrlEquals { value } => {
                let url = self.current_url.read().await.clone();
                Ok(AssertionOutcome { passed: &url == value, actual_value: url })
            }
            Assertion::UrlContains { value } => {
                let url = self.current_url.read().await.clone();
                Ok(AssertionOutcome { passed: url.contains(value.as_str()), actual_value: url })
            }
            Assertion::CountEquals { value } => {
                let count = if self.elements.read().await.contains_key(selector) { 1 } else { 0 };
                Ok(AssertionOutcome { passed: count == *value, actual_value: count.to_string() })
            }
            Assertion::AttributeEquals { name, value } => {
                let element = self.resolve(selector).await?;
                let attr_name = attr.unwrap_or(name.as_str());
                let actual = element.attributes.get(attr_name).cloned().unwrap_or_default();
                Ok(AssertionOutcome { passed: &actual == value, actual_value: actual })
            }
        }
    }

    async fn snapshot_interactive_elements(&self, max_elements: usize) -> Result<Vec<DomElement>, CoreError> {
        let elements = self.elements.read().await;
        Ok(elements
            .iter()
            .filter(|(_, e)| e.visible)
            .take(max_elements)
            .map(|(locator, e)| DomElement {
                role: "generic".to_string(),
                text: e.text.clone(),
                placeholder: e.attributes.get("placeholder").cloned(),
                aria_label: e.attributes.get("aria-label").cloned(),
                tag: "div".to_string(),
                href: e.attributes.get("href").cloned(),
                id: Some(locator.clone()),
                class: None,
                bounding_box: None,
            })
            .collect())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, CoreError> {
        self.screenshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn current_url(&self) -> Result<String, CoreError> {
        Ok(self.current_url.read().await.clone())
    }

    async fn title(&self) -> Result<String, CoreError> {
        Ok(self.title.read().await.clone())
    }

    async fn drain_events(&self) -> Vec<DriverEvent> {
        std::mem::take(&mut *self.events.write().await)
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unseeded_locator_fails_with_driver_locator() {
        let driver = MockBrowserDriver::new();
        let err = driver.click("text=Missing").await.unwrap_err();
        assert_eq!(err.code(), "driver.locator");
    }

    #[tokio::test]
    async fn seeded_locator_resolves() {
        let driver = MockBrowserDriver::new();
        driver.seed_element("text=Submit", MockElement::new("Submit")).await;
        assert!(driver.click("text=Submit").await.is_ok());
    }

    #[tokio::test]
    async fn screenshot_increments_call_count() {
        let driver = MockBrowserDriver::new();
        driver.screenshot().await.unwrap();
        driver.screenshot().await.unwrap();
        assert_eq!(driver.screenshot_call_count(), 2);
    }

    #[tokio::test]
    async fn close_marks_driver_closed() {
        let driver = MockBrowserDriver::new();
        assert!(!driver.is_closed());
        driver.close().await.unwrap();
        assert!(driver.is_closed());
    }
}
