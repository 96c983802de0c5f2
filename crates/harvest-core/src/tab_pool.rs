//! Bounded pool of browser tabs over one shared driver process: one real
//! browser, several logical tabs multiplexed onto it, with a process-wide
//! lock serializing every driver-touching call because the driver itself is
//! not safe to use from two threads at once.

use crate::politeness::PolitenessController;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TabPoolError {
    #[error("no such tab: {0}")]
    UnknownTab(u32),
    #[error("driver error: {0}")]
    Driver(String),
    #[error("captcha policy set to ignore: skipping page")]
    CaptchaIgnored,
    #[error("captcha bypass solver not implemented")]
    CaptchaUnimplemented,
    #[error("captcha present, timed out waiting for manual resolution")]
    CaptchaWaitTimedOut,
    #[error("page load exceeded url_timeout")]
    LoadTimedOut,
}

/// Captcha handling policy, configurable via `captcha_action` (spec.md
/// §4.B / §6 / §7). The actual solving backend (a human operator or an
/// external solver service) is out of scope; this only dispatches among the
/// three named modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaPolicy {
    Ignore,
    WaitUser,
    Bypass,
}

impl CaptchaPolicy {
    const WAIT_USER_POLL_INTERVAL: Duration = Duration::from_secs(2);
    const WAIT_USER_MAX_POLLS: u32 = 30;
}

/// The out-of-scope real browser-automation surface. Production wiring
/// supplies a WebDriver-backed implementation; tests use `FakeDriver`.
pub trait BrowserDriver: Send {
    fn open_tab(&mut self) -> Result<String, TabPoolError>;
    fn switch_to(&mut self, window_handle: &str) -> Result<(), TabPoolError>;
    fn navigate(&mut self, url: &str) -> Result<(), TabPoolError>;
    fn page_source(&mut self) -> Result<String, TabPoolError>;
    fn dismiss_alert_if_present(&mut self) -> Result<(), TabPoolError>;
    fn current_url(&mut self) -> Result<String, TabPoolError>;
    fn quit(&mut self) -> Result<(), TabPoolError>;
    fn restart(&mut self) -> Result<(), TabPoolError>;
}

struct TabSlot {
    tab_id: u32,
    window_handle: String,
    available: bool,
    last_url: Option<String>,
}

struct PoolState {
    slots: Vec<TabSlot>,
}

/// Fixed-capacity pool of tabs over a single `BrowserDriver`. `driver_lock`
/// serializes every call that touches the driver handle; `state` plus
/// `available` is the condvar-guarded acquire/release bookkeeping.
pub struct TabPool {
    driver: Arc<Mutex<Box<dyn BrowserDriver>>>,
    state: Mutex<PoolState>,
    available: Condvar,
    politeness: Arc<PolitenessController>,
    captcha_policy: CaptchaPolicy,
    url_timeout: Option<Duration>,
}

impl TabPool {
    pub fn new(
        mut driver: Box<dyn BrowserDriver>,
        max_tabs: u32,
        politeness: Arc<PolitenessController>,
        captcha_policy: CaptchaPolicy,
        url_timeout: Option<Duration>,
    ) -> Result<Self, TabPoolError> {
        let mut slots = Vec::with_capacity(max_tabs as usize);
        for tab_id in 0..max_tabs {
            let window_handle = driver.open_tab()?;
            slots.push(TabSlot { tab_id, window_handle, available: true, last_url: None });
        }
        Ok(TabPool {
            driver: Arc::new(Mutex::new(driver)),
            state: Mutex::new(PoolState { slots }),
            available: Condvar::new(),
            politeness,
            captcha_policy,
            url_timeout,
        })
    }

    /// Block until a tab is available, then mark it unavailable and return
    /// its id. `tag` is accepted for caller-side bookkeeping but is not
    /// otherwise used by the pool itself.
    pub fn acquire(&self, _tag: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(slot) = state.slots.iter_mut().find(|s| s.available) {
                slot.available = false;
                return slot.tab_id;
            }
            state = self.available.wait(state).unwrap();
        }
    }

    pub fn release(&self, tab_id: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.slots.iter_mut().find(|s| s.tab_id == tab_id) {
            slot.available = true;
        }
        self.available.notify_one();
    }

    /// Switch to `tab_id`'s window and navigate to `url`, dismissing any
    /// unexpected alert along the way. Bounded by `url_timeout` if
    /// configured, per spec.md §4.D/§6; expiry surfaces as
    /// [`TabPoolError::LoadTimedOut`] for the caller to map onto a
    /// `Timeout`-style retry.
    pub async fn load(&self, tab_id: u32, url: &str) -> Result<(), TabPoolError> {
        let window_handle = self.window_handle(tab_id)?;
        let driver = Arc::clone(&self.driver);
        let owned_url = url.to_owned();

        let navigate = tokio::task::spawn_blocking(move || {
            let mut driver = driver.lock().unwrap();
            driver.switch_to(&window_handle)?;
            driver.navigate(&owned_url)?;
            driver.dismiss_alert_if_present()
        });

        match self.url_timeout {
            Some(timeout) => tokio::time::timeout(timeout, navigate)
                .await
                .map_err(|_| TabPoolError::LoadTimedOut)?
                .map_err(|e| TabPoolError::Driver(e.to_string()))??,
            None => navigate.await.map_err(|e| TabPoolError::Driver(e.to_string()))??,
        }

        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.slots.iter_mut().find(|s| s.tab_id == tab_id) {
            slot.last_url = Some(url.to_string());
        }
        Ok(())
    }

    /// Return `tab_id`'s page source after waiting `extra_wait` seconds if
    /// positive, else a uniform random wait drawn from the politeness
    /// controller's current window. If `possible_captcha_div` names an
    /// element id and it is present in the page, runs the captcha policy
    /// before returning.
    pub async fn html(
        &self,
        tab_id: u32,
        extra_wait: f64,
        possible_captcha_div: Option<&str>,
    ) -> Result<String, TabPoolError> {
        let window_handle = self.window_handle(tab_id)?;

        let wait_secs = if extra_wait > 0.0 {
            extra_wait
        } else {
            let (min, max) = self.politeness.wait_window();
            if max > min {
                rand::Rng::gen_range(&mut rand::thread_rng(), min..max)
            } else {
                min
            }
        };
        tokio::time::sleep(Duration::from_secs_f64(wait_secs.max(0.0))).await;

        let page = {
            let mut driver = self.driver.lock().unwrap();
            driver.switch_to(&window_handle)?;
            driver.page_source()?
        };

        let Some(div_id) = possible_captcha_div else {
            return Ok(page);
        };
        if !page.contains(div_id) {
            return Ok(page);
        }

        match self.captcha_policy {
            CaptchaPolicy::Ignore => {
                tracing::warn!(tab_id, %div_id, "captcha detected, policy set to ignore");
                Err(TabPoolError::CaptchaIgnored)
            }
            CaptchaPolicy::Bypass => {
                tracing::warn!(tab_id, %div_id, "captcha detected, bypass solver not implemented");
                Err(TabPoolError::CaptchaUnimplemented)
            }
            CaptchaPolicy::WaitUser => {
                tracing::warn!(tab_id, %div_id, "captcha detected, waiting for manual resolution");
                for _ in 0..CaptchaPolicy::WAIT_USER_MAX_POLLS {
                    tokio::time::sleep(CaptchaPolicy::WAIT_USER_POLL_INTERVAL).await;
                    let page = {
                        let mut driver = self.driver.lock().unwrap();
                        driver.switch_to(&window_handle)?;
                        driver.page_source()?
                    };
                    if !page.contains(div_id) {
                        return Ok(page);
                    }
                }
                Err(TabPoolError::CaptchaWaitTimedOut)
            }
        }
    }

    /// Snapshot every tab's current URL, quit and reinitialize the driver,
    /// reopen one tab per slot, and reload each previous URL.
    pub fn restart(&self, max_tabs: u32) -> Result<(), TabPoolError> {
        let urls: Vec<Option<String>> = {
            let state = self.state.lock().unwrap();
            state.slots.iter().map(|s| s.last_url.clone()).collect()
        };

        let mut driver = self.driver.lock().unwrap();
        driver.quit()?;
        driver.restart()?;

        let mut new_slots = Vec::with_capacity(max_tabs as usize);
        for (tab_id, prev_url) in (0..max_tabs).zip(urls.into_iter().chain(std::iter::repeat(None))) {
            let window_handle = driver.open_tab()?;
            if let Some(url) = &prev_url {
                driver.switch_to(&window_handle)?;
                driver.navigate(url)?;
            }
            new_slots.push(TabSlot { tab_id, window_handle, available: true, last_url: prev_url });
        }

        let mut state = self.state.lock().unwrap();
        state.slots = new_slots;
        drop(state);
        self.available.notify_all();
        Ok(())
    }

    fn window_handle(&self, tab_id: u32) -> Result<String, TabPoolError> {
        let state = self.state.lock().unwrap();
        state
            .slots
            .iter()
            .find(|s| s.tab_id == tab_id)
            .map(|s| s.window_handle.clone())
            .ok_or(TabPoolError::UnknownTab(tab_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::politeness::PolitenessController;
    use harvest_store::Store;

    struct FakeDriver {
        next_handle: u32,
        current: Option<String>,
        pages: std::collections::HashMap<String, String>,
    }

    impl FakeDriver {
        fn new() -> Self {
            FakeDriver { next_handle: 0, current: None, pages: std::collections::HashMap::new() }
        }
    }

    impl BrowserDriver for FakeDriver {
        fn open_tab(&mut self) -> Result<String, TabPoolError> {
            let handle = format!("handle-{}", self.next_handle);
            self.next_handle += 1;
            Ok(handle)
        }
        fn switch_to(&mut self, window_handle: &str) -> Result<(), TabPoolError> {
            self.current = Some(window_handle.to_string());
            Ok(())
        }
        fn navigate(&mut self, url: &str) -> Result<(), TabPoolError> {
            self.pages.insert(self.current.clone().unwrap(), format!("page for {url}"));
            Ok(())
        }
        fn page_source(&mut self) -> Result<String, TabPoolError> {
            Ok(self.pages.get(self.current.as_ref().unwrap()).cloned().unwrap_or_default())
        }
        fn dismiss_alert_if_present(&mut self) -> Result<(), TabPoolError> {
            Ok(())
        }
        fn current_url(&mut self) -> Result<String, TabPoolError> {
            Ok(String::new())
        }
        fn quit(&mut self) -> Result<(), TabPoolError> {
            Ok(())
        }
        fn restart(&mut self) -> Result<(), TabPoolError> {
            self.next_handle = 0;
            self.pages.clear();
            Ok(())
        }
    }

    fn pool(max_tabs: u32) -> TabPool {
        pool_with_policy(max_tabs, CaptchaPolicy::Ignore)
    }

    fn pool_with_policy(max_tabs: u32, captcha_policy: CaptchaPolicy) -> TabPool {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let politeness = Arc::new(PolitenessController::new(0.1, 0.2, 1.0, store));
        TabPool::new(Box::new(FakeDriver::new()), max_tabs, politeness, captcha_policy, None).unwrap()
    }

    #[test]
    fn acquire_marks_tab_unavailable_until_released() {
        let pool = pool(1);
        let tab = pool.acquire("t1");
        assert_eq!(tab, 0);
        pool.release(tab);
        assert_eq!(pool.acquire("t2"), 0);
    }

    #[tokio::test]
    async fn load_records_the_last_url_navigated() {
        let pool = pool(1);
        let tab = pool.acquire("t1");
        pool.load(tab, "https://example.test/a").await.unwrap();
        let state = pool.state.lock().unwrap();
        assert_eq!(state.slots[0].last_url.as_deref(), Some("https://example.test/a"));
    }

    #[tokio::test]
    async fn load_times_out_when_url_timeout_elapses() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let politeness = Arc::new(PolitenessController::new(0.1, 0.2, 1.0, store));
        let pool = TabPool::new(
            Box::new(FakeDriver::new()),
            1,
            politeness,
            CaptchaPolicy::Ignore,
            Some(Duration::from_nanos(1)),
        )
        .unwrap();
        let tab = pool.acquire("t1");
        let err = pool.load(tab, "https://example.test/a").await.unwrap_err();
        assert!(matches!(err, TabPoolError::LoadTimedOut));
    }

    #[tokio::test]
    async fn html_returns_the_loaded_page_source() {
        let pool = pool(1);
        let tab = pool.acquire("t1");
        pool.load(tab, "https://example.test/a").await.unwrap();
        let html = pool.html(tab, 0.01, None).await.unwrap();
        assert!(html.contains("https://example.test/a"));
    }

    #[tokio::test]
    async fn html_skips_captcha_check_when_div_absent() {
        let pool = pool(1);
        let tab = pool.acquire("t1");
        pool.load(tab, "https://example.test/a").await.unwrap();
        let html = pool.html(tab, 0.01, Some("captcha-div")).await.unwrap();
        assert!(html.contains("https://example.test/a"));
    }

    #[tokio::test]
    async fn ignore_policy_errors_when_captcha_div_present() {
        let pool = pool_with_policy(1, CaptchaPolicy::Ignore);
        let tab = pool.acquire("t1");
        pool.load(tab, "https://example.test/captcha-div").await.unwrap();
        let err = pool.html(tab, 0.01, Some("captcha-div")).await.unwrap_err();
        assert!(matches!(err, TabPoolError::CaptchaIgnored));
    }

    #[tokio::test]
    async fn bypass_policy_errors_unimplemented_when_captcha_div_present() {
        let pool = pool_with_policy(1, CaptchaPolicy::Bypass);
        let tab = pool.acquire("t1");
        pool.load(tab, "https://example.test/captcha-div").await.unwrap();
        let err = pool.html(tab, 0.01, Some("captcha-div")).await.unwrap_err();
        assert!(matches!(err, TabPoolError::CaptchaUnimplemented));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_user_policy_times_out_when_captcha_never_clears() {
        let pool = pool_with_policy(1, CaptchaPolicy::WaitUser);
        let tab = pool.acquire("t1");
        pool.load(tab, "https://example.test/captcha-div").await.unwrap();
        let err = pool.html(tab, 0.01, Some("captcha-div")).await.unwrap_err();
        assert!(matches!(err, TabPoolError::CaptchaWaitTimedOut));
    }

    #[tokio::test]
    async fn restart_reopens_tabs_and_reloads_prior_urls() {
        let pool = pool(1);
        let tab = pool.acquire("t1");
        pool.load(tab, "https://example.test/a").await.unwrap();
        pool.release(tab);
        pool.restart(1).unwrap();

        let state = pool.state.lock().unwrap();
        assert_eq!(state.slots.len(), 1);
        assert_eq!(state.slots[0].last_url.as_deref(), Some("https://example.test/a"));
    }
}
