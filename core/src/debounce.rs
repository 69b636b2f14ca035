//! Debounced aggregation of outbound lines.
//!
//! The aggregator is a plain state machine: callers push items and ask for
//! the current flush deadline; the owning task supplies the clock by
//! selecting on `sleep_until(deadline)`. Every pushed item ends up in
//! exactly one batch, in push order, either when the quiescent interval
//! elapses or when the buffered size cap preempts the timer.

use tokio::time::Duration;
use tokio::time::Instant;

pub struct Debouncer {
    interval: Duration,
    max_buffered: usize,
    items: Vec<String>,
    buffered: usize,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration, max_buffered: usize) -> Self {
        Self {
            interval,
            max_buffered,
            items: Vec::new(),
            buffered: 0,
            deadline: None,
        }
    }

    /// Appends an item and re-arms the flush timer. Returns a full batch
    /// when this push drove the buffered size over the cap; the timer is
    /// disarmed until the next push.
    #[must_use]
    pub fn push(&mut self, item: String) -> Option<Vec<String>> {
        if item.is_empty() {
            return None;
        }
        self.buffered += item.chars().count();
        self.items.push(item);
        if self.buffered >= self.max_buffered {
            return Some(self.take_batch());
        }
        self.deadline = Some(Instant::now() + self.interval);
        None
    }

    /// Deadline of the pending flush, if any. `None` while the buffer is
    /// empty so the timer never fires on nothing.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Hands over everything buffered so far, in push order, and disarms
    /// the timer.
    pub fn take_batch(&mut self) -> Vec<String> {
        self.deadline = None;
        self.buffered = 0;
        std::mem::take(&mut self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn debouncer(max: usize) -> Debouncer {
        Debouncer::new(Duration::from_millis(500), max)
    }

    #[test]
    fn push_arms_timer_and_preserves_order() {
        let mut d = debouncer(1024);
        assert!(d.deadline().is_none());
        assert!(d.push("one".to_string()).is_none());
        assert!(d.deadline().is_some());
        assert!(d.push("two".to_string()).is_none());
        assert_eq!(d.take_batch(), vec!["one".to_string(), "two".to_string()]);
        assert!(d.deadline().is_none());
        assert!(d.is_empty());
    }

    #[test]
    fn empty_item_is_a_no_op() {
        let mut d = debouncer(1024);
        assert!(d.push(String::new()).is_none());
        assert!(d.deadline().is_none());
        assert!(d.is_empty());
    }

    #[test]
    fn each_push_resets_the_deadline() {
        let mut d = debouncer(1024);
        let _ = d.push("a".to_string());
        let first = d.deadline().unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let _ = d.push("b".to_string());
        let second = d.deadline().unwrap();
        assert!(second > first);
    }

    #[test]
    fn size_cap_preempts_the_timer() {
        let mut d = debouncer(8);
        assert!(d.push("1234".to_string()).is_none());
        let batch = d.push("5678".to_string()).expect("cap reached");
        assert_eq!(batch, vec!["1234".to_string(), "5678".to_string()]);
        // Preempting flush disarms the timer until the next push.
        assert!(d.deadline().is_none());
        assert!(d.is_empty());
    }

    #[test]
    fn size_is_measured_in_code_points() {
        let mut d = debouncer(4);
        // Four two-byte code points reach the cap of 4.
        assert!(d.push("éé".to_string()).is_none());
        assert!(d.push("éé".to_string()).is_some());
    }

    #[test]
    fn take_batch_on_empty_is_empty() {
        let mut d = debouncer(16);
        assert!(d.take_batch().is_empty());
    }
}
