use harvest_store::Store;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Additive wait-window controller, ported from `BanChecker`. `min_wait`/
/// `max_wait` bound the delay a caller should sleep between requests to the
/// same source; both widen (by `penalty`) the moment a ban phrase is seen,
/// and narrow by one each quiet hour.
pub struct PolitenessController {
    min_wait: Mutex<f64>,
    max_wait: Mutex<f64>,
    penalty: f64,
    store: Arc<Store>,
}

/// Strip HTML tags down to visible text, the same way `BeautifulSoup(...).get_text`
/// is used in `has_ban_phrase` — just enough to keep a ban phrase scan from
/// matching inside a `<script>` tag's markup. Not a general HTML parser.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

impl PolitenessController {
    pub fn new(min_wait: f64, max_wait: f64, penalty: f64, store: Arc<Store>) -> Self {
        PolitenessController {
            min_wait: Mutex::new(min_wait),
            max_wait: Mutex::new(max_wait),
            penalty,
            store,
        }
    }

    pub fn wait_window(&self) -> (f64, f64) {
        (*self.min_wait.lock().unwrap(), *self.max_wait.lock().unwrap())
    }

    /// Scan fetched HTML for `phrase` (case-insensitive). On a match, widens
    /// the wait window and records `was_banned = true`.
    pub fn has_ban_phrase(&self, html: &str, phrase: &str) -> bool {
        let text = strip_tags(html).to_lowercase();
        if !text.contains(&phrase.to_lowercase()) {
            return false;
        }

        let mut min_wait = self.min_wait.lock().unwrap();
        let mut max_wait = self.max_wait.lock().unwrap();
        let roll: f64 = rand::thread_rng().gen();

        if roll > 0.5 && *max_wait > *min_wait {
            let new_min = *min_wait + self.penalty;
            *min_wait = new_min;
            let floor = new_min + new_min.sqrt();
            if *max_wait < floor {
                *max_wait = floor;
            }
        } else {
            let new_max = *max_wait + self.penalty;
            *max_wait = new_max;
            let floor = *min_wait + min_wait.sqrt();
            if new_max < floor {
                *max_wait = floor;
            }
        }
        drop(min_wait);
        drop(max_wait);

        if let Err(err) = self.store.stats.set_was_banned(true) {
            tracing::warn!(%err, "failed to persist ban flag");
        }
        true
    }

    /// The opposite of [`Self::has_ban_phrase`]'s widening, applied once per
    /// quiet hour by [`Self::run_monitor`].
    fn reverse_logic(&self) {
        let mut min_wait = self.min_wait.lock().unwrap();
        let mut max_wait = self.max_wait.lock().unwrap();
        let roll: f64 = rand::thread_rng().gen();

        if roll > 0.5 && *max_wait <= *min_wait {
            *min_wait = (*min_wait - 1.0).max(0.0);
        } else {
            let new_max = *max_wait - 1.0;
            let floor = *min_wait + min_wait.sqrt();
            *max_wait = floor.max(new_max);
        }
    }

    /// Background task: every hour, clear a ban flag if set, else narrow the
    /// wait window by one. Ported from `monitor_ban_state`.
    pub async fn run_monitor(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            match self.store.stats.was_banned() {
                Ok(true) => {
                    if let Err(err) = self.store.stats.set_was_banned(false) {
                        tracing::warn!(%err, "failed to clear ban flag");
                    }
                }
                Ok(false) => self.reverse_logic(),
                Err(err) => tracing::warn!(%err, "failed to read ban flag"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(min: f64, max: f64, penalty: f64) -> PolitenessController {
        let store = Arc::new(Store::open_in_memory().unwrap());
        PolitenessController::new(min, max, penalty, store)
    }

    #[test]
    fn strip_tags_keeps_visible_text_only() {
        assert_eq!(strip_tags("<p>hello <b>world</b></p>"), "hello world");
    }

    #[test]
    fn has_ban_phrase_widens_window_and_sets_flag() {
        let c = controller(5.0, 10.0, 2.0);
        assert!(c.has_ban_phrase("<p>We're sorry, unusual traffic</p>", "we're sorry"));
        let (min, max) = c.wait_window();
        assert!(min > 5.0 || max > 10.0);
        assert!(c.store.stats.was_banned().unwrap());
    }

    #[test]
    fn has_ban_phrase_ignores_non_matching_text() {
        let c = controller(5.0, 10.0, 2.0);
        assert!(!c.has_ban_phrase("<p>all good here</p>", "we're sorry"));
        assert_eq!(c.wait_window(), (5.0, 10.0));
    }

    #[test]
    fn reverse_logic_never_drops_min_below_zero() {
        let c = controller(0.0, 1.0, 1.0);
        for _ in 0..10 {
            c.reverse_logic();
        }
        let (min, _max) = c.wait_window();
        assert!(min >= 0.0);
    }
}
