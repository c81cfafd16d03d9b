//! Subscription Registry
//!
//! Tracks which downstream sinks are interested in which symbols and decides
//! when the shared upstream connection must subscribe or unsubscribe.
//!
//! # Design
//!
//! The registry tracks:
//! - Symbol → set of sinks (the reference count is the set's cardinality)
//! - Sink → set of symbols (for whole-sink removal on disconnect)
//!
//! Both maps sit behind one lock so the empty→non-empty and
//! non-empty→empty decisions are atomic. A symbol with no sinks has no
//! entry at all.
//!
//! Sinks are held as `Weak` references. The connection that created a sink
//! owns it; the registry never extends its lifetime.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::domain::market::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a downstream sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl SinkId {
    /// Generate a new random sink id.
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().as_u64_pair().0)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for SinkId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{:016x}", self.0)
    }
}

/// Upstream action implied by a registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SubscriptionChange {
    /// First sink for the symbol; subscribe upstream.
    Subscribe,
    /// Last sink for the symbol left; unsubscribe upstream.
    Unsubscribe,
    /// Membership changed (or not) without crossing zero.
    Unchanged,
}

impl SubscriptionChange {
    /// Check if the change requires an upstream command.
    #[must_use]
    pub const fn requires_upstream(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

// =============================================================================
// Registry State
// =============================================================================

struct RegistryState<S: ?Sized> {
    symbol_sinks: HashMap<Symbol, HashMap<SinkId, Weak<S>>>,
    sink_symbols: HashMap<SinkId, HashSet<Symbol>>,
}

impl<S: ?Sized> Default for RegistryState<S> {
    fn default() -> Self {
        Self {
            symbol_sinks: HashMap::new(),
            sink_symbols: HashMap::new(),
        }
    }
}

impl<S: ?Sized> RegistryState<S> {
    /// Drop `symbol` from the sink's reverse entry.
    fn unlink(&mut self, sink: SinkId, symbol: &Symbol) {
        if let Some(symbols) = self.sink_symbols.get_mut(&sink) {
            symbols.remove(symbol);
            if symbols.is_empty() {
                self.sink_symbols.remove(&sink);
            }
        }
    }

    /// Drop `sink` from the symbol's set. Returns true if the set emptied.
    fn detach(&mut self, symbol: &Symbol, sink: SinkId) -> Option<bool> {
        let sinks = self.symbol_sinks.get_mut(symbol)?;
        sinks.remove(&sink)?;

        if sinks.is_empty() {
            self.symbol_sinks.remove(symbol);
            Some(true)
        } else {
            Some(false)
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Symbol → sinks map with reference-counted upstream decisions.
///
/// Generic over the sink type so the domain stays free of transport
/// concerns; the relay instantiates it with `dyn QuoteSink`.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use quote_relay::domain::market::Symbol;
/// use quote_relay::domain::subscription::{SinkId, SubscriptionChange, SubscriptionRegistry};
///
/// let registry: SubscriptionRegistry<()> = SubscriptionRegistry::new();
/// let aapl = Symbol::parse("AAPL").unwrap();
/// let (a, b) = (Arc::new(()), Arc::new(()));
///
/// assert_eq!(registry.subscribe(&aapl, SinkId::from(1), &a), SubscriptionChange::Subscribe);
/// assert_eq!(registry.subscribe(&aapl, SinkId::from(2), &b), SubscriptionChange::Unchanged);
/// assert_eq!(registry.unsubscribe(&aapl, SinkId::from(1)), SubscriptionChange::Unchanged);
/// assert_eq!(registry.unsubscribe(&aapl, SinkId::from(2)), SubscriptionChange::Unsubscribe);
/// assert!(registry.is_empty());
/// ```
pub struct SubscriptionRegistry<S: ?Sized> {
    state: RwLock<RegistryState<S>>,
}

impl<S: ?Sized> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized> fmt::Debug for SubscriptionRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("SubscriptionRegistry")
            .field("symbols", &stats.symbol_count)
            .field("sinks", &stats.sink_count)
            .finish()
    }
}

impl<S: ?Sized> SubscriptionRegistry<S> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Register `sink` for `symbol`.
    ///
    /// Idempotent: re-registering a sink already present changes nothing.
    /// Returns `Subscribe` when the symbol gained its first sink.
    pub fn subscribe(&self, symbol: &Symbol, id: SinkId, sink: &Arc<S>) -> SubscriptionChange {
        let mut state = self.state.write();

        let sinks = state.symbol_sinks.entry(symbol.clone()).or_default();
        if sinks.contains_key(&id) {
            return SubscriptionChange::Unchanged;
        }

        let first = sinks.is_empty();
        sinks.insert(id, Arc::downgrade(sink));
        state
            .sink_symbols
            .entry(id)
            .or_default()
            .insert(symbol.clone());

        if first {
            SubscriptionChange::Subscribe
        } else {
            SubscriptionChange::Unchanged
        }
    }

    /// Remove `sink` from `symbol`.
    ///
    /// Idempotent: removing a sink that is not registered changes nothing.
    /// Returns `Unsubscribe` when the symbol lost its last sink.
    pub fn unsubscribe(&self, symbol: &Symbol, id: SinkId) -> SubscriptionChange {
        let mut state = self.state.write();

        match state.detach(symbol, id) {
            None => SubscriptionChange::Unchanged,
            Some(emptied) => {
                state.unlink(id, symbol);
                if emptied {
                    SubscriptionChange::Unsubscribe
                } else {
                    SubscriptionChange::Unchanged
                }
            }
        }
    }

    /// Remove a sink from every symbol it is registered for.
    ///
    /// Returns the symbols that lost their last sink and must be
    /// unsubscribed upstream.
    pub fn remove_sink(&self, id: SinkId) -> Vec<Symbol> {
        let mut state = self.state.write();

        let Some(symbols) = state.sink_symbols.remove(&id) else {
            return vec![];
        };

        let mut emptied: Vec<Symbol> = symbols
            .into_iter()
            .filter(|symbol| state.detach(symbol, id) == Some(true))
            .collect();
        emptied.sort();
        emptied
    }

    /// Snapshot the sinks registered for `symbol`.
    ///
    /// The references are weak; callers upgrade them for the duration of a
    /// single send.
    #[must_use]
    pub fn sinks_for(&self, symbol: &Symbol) -> Vec<(SinkId, Weak<S>)> {
        self.state
            .read()
            .symbol_sinks
            .get(symbol)
            .map(|sinks| {
                sinks
                    .iter()
                    .map(|(id, sink)| (*id, Weak::clone(sink)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All symbols with at least one sink, sorted.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.state.read().symbol_sinks.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Symbols a sink is registered for, sorted.
    #[must_use]
    pub fn symbols_for(&self, id: SinkId) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .state
            .read()
            .sink_symbols
            .get(&id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort();
        symbols
    }

    /// Number of sinks registered for `symbol`.
    #[must_use]
    pub fn subscriber_count(&self, symbol: &Symbol) -> usize {
        self.state
            .read()
            .symbol_sinks
            .get(symbol)
            .map_or(0, HashMap::len)
    }

    /// Check if `symbol` has an entry.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.state.read().symbol_sinks.contains_key(symbol)
    }

    /// Check if `sink` is registered for `symbol`.
    #[must_use]
    pub fn is_subscribed(&self, symbol: &Symbol, id: SinkId) -> bool {
        self.state
            .read()
            .symbol_sinks
            .get(symbol)
            .is_some_and(|sinks| sinks.contains_key(&id))
    }

    /// Check if no symbol has any sink.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().symbol_sinks.is_empty()
    }

    /// Remove everything, returning one reference per distinct sink.
    pub fn clear(&self) -> Vec<(SinkId, Weak<S>)> {
        let mut state = self.state.write();
        let mut sinks: HashMap<SinkId, Weak<S>> = HashMap::new();

        for (_, entry) in state.symbol_sinks.drain() {
            for (id, sink) in entry {
                sinks.entry(id).or_insert(sink);
            }
        }
        state.sink_symbols.clear();

        sinks.into_iter().collect()
    }

    /// Current registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            symbol_count: state.symbol_sinks.len(),
            sink_count: state.sink_symbols.len(),
            subscription_count: state.symbol_sinks.values().map(HashMap::len).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SubscriptionStats {
    /// Number of symbols with at least one sink.
    pub symbol_count: usize,
    /// Number of distinct sinks.
    pub sink_count: usize,
    /// Total (symbol, sink) pairs.
    pub subscription_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    struct TestSink;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn sink() -> Arc<TestSink> {
        Arc::new(TestSink)
    }

    impl<S: ?Sized> SubscriptionRegistry<S> {
        /// Forward and reverse maps agree and no entry is empty.
        fn assert_consistent(&self) {
            let state = self.state.read();
            for (symbol, sinks) in &state.symbol_sinks {
                assert!(!sinks.is_empty(), "empty entry for {symbol}");
                for id in sinks.keys() {
                    assert!(state.sink_symbols[id].contains(symbol));
                }
            }
            for (id, symbols) in &state.sink_symbols {
                assert!(!symbols.is_empty(), "empty reverse entry for {id}");
                for symbol in symbols {
                    assert!(state.symbol_sinks[symbol].contains_key(id));
                }
            }
        }
    }

    #[test]
    fn first_subscriber_triggers_subscribe() {
        let registry = SubscriptionRegistry::new();
        let s = sink();

        let change = registry.subscribe(&sym("AAPL"), SinkId::from(1), &s);

        assert_eq!(change, SubscriptionChange::Subscribe);
        assert_eq!(registry.subscriber_count(&sym("AAPL")), 1);
    }

    #[test]
    fn second_subscriber_is_unchanged() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (sink(), sink());

        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(1), &a);
        let change = registry.subscribe(&sym("AAPL"), SinkId::from(2), &b);

        assert_eq!(change, SubscriptionChange::Unchanged);
        assert_eq!(registry.subscriber_count(&sym("AAPL")), 2);
    }

    #[test]
    fn duplicate_subscribe_is_noop() {
        let registry = SubscriptionRegistry::new();
        let a = sink();

        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(1), &a);
        let change = registry.subscribe(&sym("AAPL"), SinkId::from(1), &a);

        assert_eq!(change, SubscriptionChange::Unchanged);
        assert_eq!(registry.subscriber_count(&sym("AAPL")), 1);
    }

    #[test]
    fn last_unsubscribe_removes_entry() {
        let registry = SubscriptionRegistry::new();
        let a = sink();

        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(1), &a);
        let change = registry.unsubscribe(&sym("AAPL"), SinkId::from(1));

        assert_eq!(change, SubscriptionChange::Unsubscribe);
        assert!(!registry.contains(&sym("AAPL")));
        assert!(registry.is_empty());
        assert!(registry.symbols_for(SinkId::from(1)).is_empty());
    }

    #[test]
    fn unsubscribe_with_remaining_sinks() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (sink(), sink());

        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(1), &a);
        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(2), &b);
        let change = registry.unsubscribe(&sym("AAPL"), SinkId::from(1));

        assert_eq!(change, SubscriptionChange::Unchanged);
        assert!(registry.is_subscribed(&sym("AAPL"), SinkId::from(2)));
        assert!(!registry.is_subscribed(&sym("AAPL"), SinkId::from(1)));
    }

    #[test]
    fn unsubscribe_twice_equals_once() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (sink(), sink());

        let _ = registry.subscribe(&sym("TSLA"), SinkId::from(1), &a);
        let _ = registry.subscribe(&sym("TSLA"), SinkId::from(2), &b);

        let first = registry.unsubscribe(&sym("TSLA"), SinkId::from(1));
        let stats_after_first = registry.stats();
        let second = registry.unsubscribe(&sym("TSLA"), SinkId::from(1));

        assert_eq!(first, SubscriptionChange::Unchanged);
        assert_eq!(second, SubscriptionChange::Unchanged);
        assert_eq!(registry.stats(), stats_after_first);
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let registry: SubscriptionRegistry<TestSink> = SubscriptionRegistry::new();
        assert_eq!(
            registry.unsubscribe(&sym("AAPL"), SinkId::from(9)),
            SubscriptionChange::Unchanged
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_sink_returns_emptied_symbols() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (sink(), sink());

        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(1), &a);
        let _ = registry.subscribe(&sym("MSFT"), SinkId::from(1), &a);
        let _ = registry.subscribe(&sym("GOOG"), SinkId::from(1), &a);
        let _ = registry.subscribe(&sym("MSFT"), SinkId::from(2), &b);

        let emptied = registry.remove_sink(SinkId::from(1));

        assert_eq!(emptied, vec![sym("AAPL"), sym("GOOG")]);
        assert_eq!(registry.active_symbols(), vec![sym("MSFT")]);
        registry.assert_consistent();
    }

    #[test]
    fn remove_unknown_sink_is_noop() {
        let registry = SubscriptionRegistry::new();
        let a = sink();
        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(1), &a);

        assert!(registry.remove_sink(SinkId::from(2)).is_empty());
        assert_eq!(registry.active_symbols(), vec![sym("AAPL")]);
    }

    #[test]
    fn registry_does_not_keep_sinks_alive() {
        let registry = SubscriptionRegistry::new();
        let a = sink();
        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(1), &a);
        drop(a);

        let snapshot = registry.sinks_for(&sym("AAPL"));
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].1.upgrade().is_none());
    }

    #[test]
    fn sinks_for_only_returns_symbol_subscribers() {
        let registry = SubscriptionRegistry::new();
        let (a, b, c) = (sink(), sink(), sink());

        let _ = registry.subscribe(&sym("TSLA"), SinkId::from(1), &a);
        let _ = registry.subscribe(&sym("TSLA"), SinkId::from(2), &b);
        let _ = registry.subscribe(&sym("MSFT"), SinkId::from(3), &c);

        let mut ids: Vec<SinkId> = registry
            .sinks_for(&sym("TSLA"))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();

        assert_eq!(ids, vec![SinkId::from(1), SinkId::from(2)]);
        assert!(registry.sinks_for(&sym("NVDA")).is_empty());
    }

    #[test]
    fn clear_returns_distinct_sinks() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (sink(), sink());

        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(1), &a);
        let _ = registry.subscribe(&sym("MSFT"), SinkId::from(1), &a);
        let _ = registry.subscribe(&sym("MSFT"), SinkId::from(2), &b);

        let cleared = registry.clear();

        assert_eq!(cleared.len(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn stats_are_accurate() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (sink(), sink());

        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(1), &a);
        let _ = registry.subscribe(&sym("MSFT"), SinkId::from(1), &a);
        let _ = registry.subscribe(&sym("AAPL"), SinkId::from(2), &b);

        let stats = registry.stats();
        assert_eq!(stats.symbol_count, 2);
        assert_eq!(stats.sink_count, 2);
        assert_eq!(stats.subscription_count, 3);
    }

    #[test]
    fn sink_id_display() {
        assert_eq!(SinkId::from(255).to_string(), "sink-00000000000000ff");
        assert_ne!(SinkId::random(), SinkId::random());
    }

    #[test]
    fn thread_safety_single_first_subscriber() {
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let sinks: Vec<_> = (0..16).map(|_| sink()).collect();
        let mut handles = vec![];

        for (i, s) in sinks.iter().enumerate() {
            let r = Arc::clone(&registry);
            let s = Arc::clone(s);
            handles.push(thread::spawn(move || {
                r.subscribe(&sym("SHARED"), SinkId::from(i as u64), &s)
            }));
        }

        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|c| *c == SubscriptionChange::Subscribe)
            .count();

        assert_eq!(firsts, 1);
        assert_eq!(registry.subscriber_count(&sym("SHARED")), 16);
    }

    #[test]
    fn thread_safety_single_last_unsubscriber() {
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let sinks: Vec<_> = (0..16).map(|_| sink()).collect();
        for (i, s) in sinks.iter().enumerate() {
            let _ = registry.subscribe(&sym("SHARED"), SinkId::from(i as u64), s);
        }

        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let r = Arc::clone(&registry);
                thread::spawn(move || r.remove_sink(SinkId::from(i)))
            })
            .collect();

        let lasts: usize = handles.into_iter().map(|h| h.join().unwrap().len()).sum();

        assert_eq!(lasts, 1);
        assert!(registry.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(u8, u8),
        Unsubscribe(u8, u8),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 0u8..5).prop_map(|(s, k)| Op::Subscribe(s, k)),
            (0u8..4, 0u8..5).prop_map(|(s, k)| Op::Unsubscribe(s, k)),
            (0u8..4).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn upstream_commands_alternate_per_symbol(ops in prop::collection::vec(op(), 1..200)) {
            let registry = SubscriptionRegistry::new();
            let sinks: Vec<_> = (0..4).map(|_| sink()).collect();
            let symbols: Vec<Symbol> = (0..5).map(|i| sym(&format!("S{i}"))).collect();
            let mut upstream: HashMap<Symbol, bool> = HashMap::new();

            for op in ops {
                match op {
                    Op::Subscribe(s, k) => {
                        let symbol = &symbols[k as usize];
                        let change = registry.subscribe(symbol, SinkId::from(u64::from(s)), &sinks[s as usize]);
                        if change == SubscriptionChange::Subscribe {
                            prop_assert!(!upstream.get(symbol).copied().unwrap_or(false));
                            upstream.insert(symbol.clone(), true);
                        }
                    }
                    Op::Unsubscribe(s, k) => {
                        let symbol = &symbols[k as usize];
                        if registry.unsubscribe(symbol, SinkId::from(u64::from(s))) == SubscriptionChange::Unsubscribe {
                            prop_assert!(upstream.get(symbol).copied().unwrap_or(false));
                            upstream.insert(symbol.clone(), false);
                        }
                    }
                    Op::Remove(s) => {
                        for symbol in registry.remove_sink(SinkId::from(u64::from(s))) {
                            prop_assert!(upstream.get(&symbol).copied().unwrap_or(false));
                            upstream.insert(symbol, false);
                        }
                    }
                }

                registry.assert_consistent();
                for symbol in &symbols {
                    let subscribed = upstream.get(symbol).copied().unwrap_or(false);
                    prop_assert_eq!(registry.contains(symbol), subscribed);
                    prop_assert_eq!(registry.subscriber_count(symbol) == 0, !subscribed);
                }
            }
        }
    }
}
