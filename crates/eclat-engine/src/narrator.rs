use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::config::DEFAULT_NARRATOR_PERIOD;
use crate::tracker::InFlightObserver;

pub const DEFAULT_PHRASES: [&str; 5] = [
    "Curation des produits d'exception...",
    "Analyse de la structure architecturale...",
    "Optimisation du rendu 2K Haute Définition...",
    "Dressage artistique à la pince numérique...",
    "Sublimation par l'éclairage Chiaroscuro...",
];

#[derive(Debug, Default)]
struct NarratorState {
    cursor: usize,
    /// At least one request is outstanding.
    demand: bool,
    /// Bumped on every start and stop; a ticker thread only advances the
    /// cursor while its epoch is current.
    epoch: u64,
    ticker: Option<mpsc::Sender<()>>,
}

/// Rotating status phrase shown while generations are outstanding.
///
/// Driven by [`InFlightObserver`] transitions rather than by individual
/// requests, so overlapping generations share one timer.
#[derive(Debug)]
pub struct ProgressNarrator {
    phrases: Vec<String>,
    period: Duration,
    state: Arc<Mutex<NarratorState>>,
}

impl Default for ProgressNarrator {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_NARRATOR_PERIOD)
    }
}

impl ProgressNarrator {
    /// An empty phrase list falls back to [`DEFAULT_PHRASES`].
    pub fn new(phrases: Vec<String>, period: Duration) -> Self {
        let phrases = if phrases.is_empty() {
            DEFAULT_PHRASES.iter().map(|phrase| phrase.to_string()).collect()
        } else {
            phrases
        };
        Self {
            phrases,
            period: period.max(Duration::from_millis(1)),
            state: Arc::new(Mutex::new(NarratorState::default())),
        }
    }

    pub fn with_period(period: Duration) -> Self {
        Self::new(Vec::new(), period)
    }

    fn lock(&self) -> MutexGuard<'_, NarratorState> {
        lock_state(&self.state)
    }

    /// Begin ticking. No-op while nothing is in flight or when already
    /// running.
    pub fn start(&self) {
        let mut state = self.lock();
        if !state.demand || state.ticker.is_some() {
            return;
        }
        state.epoch += 1;
        let epoch = state.epoch;
        let (tx, rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&self.state);
        let period = self.period;
        let len = self.phrases.len();
        let spawned = thread::Builder::new()
            .name("eclat-narrator".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        let mut state = lock_state(&shared);
                        if state.epoch != epoch {
                            break;
                        }
                        state.cursor = (state.cursor + 1) % len;
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });
        match spawned {
            Ok(_) => state.ticker = Some(tx),
            Err(err) => tracing::warn!(error = %err, "narrator thread failed to start"),
        }
    }

    pub fn tick(&self) {
        let mut state = self.lock();
        state.cursor = (state.cursor + 1) % self.phrases.len();
    }

    /// Cancel the timer and rewind to the first phrase.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.ticker = None;
        state.cursor = 0;
    }

    pub fn is_running(&self) -> bool {
        self.lock().ticker.is_some()
    }

    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    pub fn current_phrase(&self) -> &str {
        let cursor = self.cursor();
        &self.phrases[cursor % self.phrases.len()]
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

impl InFlightObserver for ProgressNarrator {
    fn on_busy(&self) {
        self.lock().demand = true;
        self.start();
    }

    fn on_idle(&self) {
        self.lock().demand = false;
        self.stop();
    }
}

fn lock_state(state: &Mutex<NarratorState>) -> MutexGuard<'_, NarratorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{ProgressNarrator, DEFAULT_PHRASES};
    use crate::tracker::InFlightTracker;

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let started = Instant::now();
        while started.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        check()
    }

    #[test]
    fn start_without_demand_is_a_no_op() {
        let narrator = ProgressNarrator::with_period(Duration::from_millis(5));
        narrator.start();
        assert!(!narrator.is_running());
        assert_eq!(narrator.cursor(), 0);
    }

    #[test]
    fn tick_wraps_around_the_sequence() {
        let narrator = ProgressNarrator::default();
        for _ in 0..DEFAULT_PHRASES.len() {
            narrator.tick();
        }
        assert_eq!(narrator.cursor(), 0);
        narrator.tick();
        assert_eq!(narrator.current_phrase(), DEFAULT_PHRASES[1]);
    }

    #[test]
    fn lifecycle_follows_in_flight_transitions() {
        let narrator = Arc::new(ProgressNarrator::with_period(Duration::from_secs(60)));
        let tracker = InFlightTracker::new().with_observer(narrator.clone());

        assert!(tracker.begin("dish-1"));
        assert!(narrator.is_running());
        narrator.tick();
        narrator.tick();

        assert!(tracker.begin("dish-2"));
        tracker.end("dish-1");
        assert!(narrator.is_running());
        assert_eq!(narrator.cursor(), 2);

        tracker.end("dish-2");
        assert!(!narrator.is_running());
        assert_eq!(narrator.cursor(), 0);
        assert_eq!(narrator.current_phrase(), DEFAULT_PHRASES[0]);
    }

    #[test]
    fn repeated_start_keeps_one_timer() {
        let narrator = Arc::new(ProgressNarrator::with_period(Duration::from_secs(60)));
        let tracker = InFlightTracker::new().with_observer(narrator.clone());
        tracker.begin("dish-1");
        narrator.start();
        narrator.start();
        assert!(narrator.is_running());
        tracker.end("dish-1");
        assert!(!narrator.is_running());
    }

    #[test]
    fn timer_advances_cursor_and_stops_cleanly() {
        let narrator = Arc::new(ProgressNarrator::with_period(Duration::from_millis(5)));
        let tracker = InFlightTracker::new().with_observer(narrator.clone());

        tracker.begin("dish-4");
        assert!(wait_until(Duration::from_secs(2), || narrator.cursor() != 0));

        tracker.end("dish-4");
        assert_eq!(narrator.cursor(), 0);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(narrator.cursor(), 0);
        assert!(!narrator.is_running());
    }

    #[test]
    fn custom_phrases_replace_defaults() {
        let narrator = ProgressNarrator::new(
            vec!["un".to_string(), "deux".to_string()],
            Duration::from_secs(1),
        );
        narrator.tick();
        assert_eq!(narrator.current_phrase(), "deux");
        assert_eq!(narrator.phrases().len(), 2);
    }
}
