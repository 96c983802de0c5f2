//! An in-memory `BrowserDriver` standing in for a real WebDriver session: a
//! deterministic double that the real code exercises through its real
//! trait, not a mock-the-internals shortcut.

use harvest_core::{BrowserDriver, TabPoolError};
use std::collections::HashMap;

/// Serves a scripted page body for any URL it is told to navigate to,
/// recording navigation history for assertions.
pub struct FakeDriver {
    next_handle: u32,
    current: Option<String>,
    pages: HashMap<String, String>,
    pub visited: Vec<String>,
    default_page: String,
}

impl FakeDriver {
    pub fn new() -> Self {
        FakeDriver {
            next_handle: 0,
            current: None,
            pages: HashMap::new(),
            visited: Vec::new(),
            default_page: String::new(),
        }
    }

    /// Serve `body` the next time any tab navigates to `url`.
    pub fn script_page(&mut self, url: &str, body: impl Into<String>) {
        self.pages.insert(url.to_string(), body.into());
    }

    pub fn with_default_page(mut self, body: impl Into<String>) -> Self {
        self.default_page = body.into();
        self
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserDriver for FakeDriver {
    fn open_tab(&mut self) -> Result<String, TabPoolError> {
        let handle = format!("fake-tab-{}", self.next_handle);
        self.next_handle += 1;
        Ok(handle)
    }

    fn switch_to(&mut self, window_handle: &str) -> Result<(), TabPoolError> {
        self.current = Some(window_handle.to_string());
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<(), TabPoolError> {
        self.visited.push(url.to_string());
        Ok(())
    }

    fn page_source(&mut self) -> Result<String, TabPoolError> {
        let url = self.visited.last().cloned().unwrap_or_default();
        Ok(self.pages.get(&url).cloned().unwrap_or_else(|| self.default_page.clone()))
    }

    fn dismiss_alert_if_present(&mut self) -> Result<(), TabPoolError> {
        Ok(())
    }

    fn current_url(&mut self) -> Result<String, TabPoolError> {
        Ok(self.visited.last().cloned().unwrap_or_default())
    }

    fn quit(&mut self) -> Result<(), TabPoolError> {
        Ok(())
    }

    fn restart(&mut self) -> Result<(), TabPoolError> {
        self.next_handle = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_page_is_served_after_matching_navigation() {
        let mut driver = FakeDriver::new();
        driver.script_page("https://example.test/a", "hello from a");
        let handle = driver.open_tab().unwrap();
        driver.switch_to(&handle).unwrap();
        driver.navigate("https://example.test/a").unwrap();
        assert_eq!(driver.page_source().unwrap(), "hello from a");
    }

    #[test]
    fn unscripted_navigation_falls_back_to_default_page() {
        let mut driver = FakeDriver::new().with_default_page("fallback");
        let handle = driver.open_tab().unwrap();
        driver.switch_to(&handle).unwrap();
        driver.navigate("https://example.test/unscripted").unwrap();
        assert_eq!(driver.page_source().unwrap(), "fallback");
    }
}
