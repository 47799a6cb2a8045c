//! Ruleset registry (L6): a named map of rulesets with current/default
//! pointers, each ruleset owning its own rule chain, parser list, and
//! optional private queue.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::action::Action;
use crate::error::Error;
use crate::queue::{InMemoryQueue, Queue};

/// Default capacity given to a ruleset-private queue constructed via
/// `attach_queue`. The queue collaborator itself is out of scope for
/// sizing policy; this is just enough to keep the demo/tests honest.
const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Parser names this build recognizes. Message parsing itself is out of
/// scope (the core only reassembles frames, see `crate::frame`), so this is
/// a fixed registered-names list rather than a pluggable parser registry —
/// just enough for `add_parser` to reject a typo'd or unrecognized name
/// the way the legacy source's parser lookup would.
const KNOWN_PARSERS: &[&str] = &["rfc5424", "rfc3164", "json"];

/// An ordered list of actions applied to each message a ruleset routes to
/// this rule. A rule with zero actions is never constructed successfully
/// through [`RulesetRegistry::add_rule`] — it is rejected at registration.
#[derive(Debug)]
pub struct Rule {
    actions: Vec<Box<dyn Action>>,
}

impl Rule {
    /// Creates a rule from an ordered action chain.
    pub fn new(actions: Vec<Box<dyn Action>>) -> Self {
        Rule { actions }
    }

    /// The rule's action chain, in insertion order.
    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }
}

/// A named, ordered chain of rules with its own parser list and optional
/// queue.
///
/// Sessions hold a [`std::sync::Weak`] reference to their bound `Ruleset`
/// (see [`crate::message::MessageRecord`]) rather than a strong one — the
/// cycle session → ruleset → registry → ... → session is broken at this
/// edge, the systems-language strategy spec's design notes call for.
/// `rules`/`parser_list`/`queue` are `RwLock`-guarded because the registry
/// is read-mostly: many sessions read a ruleset's rule chain concurrently
/// while it is running, and only a config reload ever writes to it.
#[derive(Debug)]
pub struct Ruleset {
    name: String,
    rules: RwLock<Vec<Rule>>,
    /// `None` means "inherit the default parser chain"; the first
    /// `add_parser` call replaces this with `Some(vec![...])`.
    parser_list: RwLock<Option<Vec<String>>>,
    queue: RwLock<Option<Arc<dyn Queue>>>,
}

impl Ruleset {
    fn new(name: String) -> Self {
        Ruleset {
            name,
            rules: RwLock::new(Vec::new()),
            parser_list: RwLock::new(None),
            queue: RwLock::new(None),
        }
    }

    /// The ruleset's name, in its original case.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ruleset's own queue, if `attach_queue` was called; `None` means
    /// the caller should fall back to sharing a global main queue.
    pub fn queue(&self) -> Option<Arc<dyn Queue>> {
        self.queue.read().expect("ruleset lock poisoned").clone()
    }

    /// Runs `rule_idx`'s rule chain against `msg`, per the single-ruleset
    /// fast path, returning the rule's disposition for the element.
    pub fn apply_rule(
        &self,
        rule_idx: usize,
        msg: &crate::message::MessageRecord,
    ) -> Result<crate::action::Disposition, Error> {
        let rules = self.rules.read().expect("ruleset lock poisoned");
        let rule = &rules[rule_idx];

        let mut disposition = crate::action::Disposition::Continue;
        for action in rule.actions() {
            disposition = action.invoke(msg)?;
            if disposition == crate::action::Disposition::Discard {
                break;
            }
        }

        Ok(disposition)
    }

    /// Number of rules currently registered.
    pub fn rule_count(&self) -> usize {
        self.rules.read().expect("ruleset lock poisoned").len()
    }
}

/// Keyed map of rulesets, keyed case-insensitively, with a default and
/// current pointer.
#[derive(Debug, Default)]
pub struct RulesetRegistry {
    rulesets: HashMap<String, Arc<Ruleset>>,
    /// Lowercased names, in construction order. Rulesets need only an
    /// ordered sequence plus a keyed lookup, not the source's generic
    /// linked-list-with-function-pointer-iteration.
    insertion_order: Vec<String>,
    default_name: Option<String>,
}

impl RulesetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        RulesetRegistry::default()
    }

    /// Constructs a new, empty ruleset named `name`. Errors if the name
    /// (case-insensitively) already exists.
    pub fn construct(&mut self, name: &str) -> Result<Arc<Ruleset>, Error> {
        let key = name.to_ascii_lowercase();

        if self.rulesets.contains_key(&key) {
            return Err(Error::ConfigInvalid(format!(
                "ruleset `{name}` already exists"
            )));
        }

        let ruleset = Arc::new(Ruleset::new(name.to_string()));
        self.rulesets.insert(key.clone(), Arc::clone(&ruleset));
        self.insertion_order.push(key);

        Ok(ruleset)
    }

    /// Looks up a ruleset by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<Arc<Ruleset>> {
        self.rulesets.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Sets the default ruleset. Silently no-ops (with a warning logged) if
    /// `name` is unknown — this matches the legacy behavior; see the design
    /// notes' open question about whether that is intended.
    pub fn set_default(&mut self, name: &str) {
        let key = name.to_ascii_lowercase();

        if !self.rulesets.contains_key(&key) {
            tracing::warn!(ruleset = name, "set_default: no such ruleset, ignoring");
            return;
        }

        self.default_name = Some(key);
    }

    /// Looks up `name` as a candidate "current" ruleset selection. Silently
    /// no-ops — returning `None`, with a warning logged — if `name` is
    /// unknown, the same contract as [`RulesetRegistry::set_default`].
    ///
    /// The registry itself holds no "current" pointer (the active ruleset
    /// during config load is carried explicitly by the caller, e.g.
    /// `ConfigLoader::current_ruleset`, per the design notes' rejection of
    /// an `ourConf`-style global), so this is a validated lookup rather
    /// than a stored selection — callers use its `Some`/`None` result to
    /// decide whether to proceed or to fall back.
    pub fn set_current(&self, name: &str) -> Option<Arc<Ruleset>> {
        let key = name.to_ascii_lowercase();

        match self.rulesets.get(&key) {
            Some(ruleset) => Some(Arc::clone(ruleset)),
            None => {
                tracing::warn!(ruleset = name, "set_current: no such ruleset, ignoring");
                None
            }
        }
    }

    /// Returns the default ruleset, set either explicitly via `set_default`
    /// or implicitly to the first constructed ruleset at `finalize`.
    pub fn default_ruleset(&self) -> Option<Arc<Ruleset>> {
        self.default_name
            .as_ref()
            .and_then(|name| self.rulesets.get(name))
            .cloned()
    }

    /// Fixes the default pointer to the first constructed ruleset if one
    /// was never set explicitly. Called once config load completes.
    pub fn finalize(&mut self) {
        if self.default_name.is_none() {
            self.default_name = self.insertion_order.first().cloned();
        }
    }

    /// Adds `rule` to `ruleset`. A rule with zero actions is dropped with a
    /// warning and never stored.
    pub fn add_rule(&self, ruleset: &Arc<Ruleset>, rule: Rule) {
        if rule.actions().is_empty() {
            tracing::warn!(
                ruleset = ruleset.name(),
                "add_rule: rule has zero actions, dropping"
            );
            return;
        }

        ruleset
            .rules
            .write()
            .expect("ruleset lock poisoned")
            .push(rule);
    }

    /// Appends `parser_name` to `ruleset`'s parser chain. The first call
    /// replaces the inherited default chain; subsequent calls append.
    ///
    /// Errors with [`Error::ParserNotFound`] if `parser_name` isn't one of
    /// [`KNOWN_PARSERS`], without touching the chain.
    pub fn add_parser(&self, ruleset: &Arc<Ruleset>, parser_name: &str) -> Result<(), Error> {
        if !KNOWN_PARSERS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(parser_name))
        {
            return Err(Error::ParserNotFound(parser_name.to_string()));
        }

        let mut parser_list = ruleset.parser_list.write().expect("ruleset lock poisoned");

        match parser_list.as_mut() {
            Some(list) => list.push(parser_name.to_string()),
            None => *parser_list = Some(vec![parser_name.to_string()]),
        }

        Ok(())
    }

    /// Constructs a private queue for the ruleset named `current`. Fails if
    /// no current ruleset is set, or if one already has a queue.
    pub fn attach_queue(&self, current: Option<&str>) -> Result<(), Error> {
        let name = current.ok_or(Error::NoCurrRuleset)?;
        let ruleset = self.get(name).ok_or(Error::NoCurrRuleset)?;

        let mut queue = ruleset.queue.write().expect("ruleset lock poisoned");
        if queue.is_some() {
            return Err(Error::RulesQueueExists(name.to_string()));
        }

        *queue = Some(Arc::new(InMemoryQueue::new(DEFAULT_QUEUE_CAPACITY)));
        Ok(())
    }

    /// Tears down every ruleset and its owned queue. Safe to call during
    /// config reload.
    ///
    /// The default pointer is cleared *before* the rulesets themselves are
    /// dropped, so it can never transiently dangle at an already-destroyed
    /// ruleset mid-teardown.
    pub fn destroy_all(&mut self) {
        self.default_name = None;
        self.insertion_order.clear();
        self.rulesets.clear();
    }

    /// Visits every action of every rule of every ruleset exactly once, in
    /// registry insertion order, then rule insertion order, then action
    /// insertion order. Used for HUP and shutdown.
    pub fn iterate_all_actions<F>(&self, mut visit: F)
    where
        F: FnMut(&str, usize, usize, &dyn Action),
    {
        for key in &self.insertion_order {
            let Some(ruleset) = self.rulesets.get(key) else {
                continue;
            };

            let rules = ruleset.rules.read().expect("ruleset lock poisoned");
            for (rule_idx, rule) in rules.iter().enumerate() {
                for (action_idx, action) in rule.actions().iter().enumerate() {
                    visit(ruleset.name(), rule_idx, action_idx, action.as_ref());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::action::{Disposition, QueueAction};
    use crate::message::MessageRecord;

    fn sample_message() -> MessageRecord {
        MessageRecord {
            payload: b"hi".to_vec(),
            peer_addr: "127.0.0.1".parse::<IpAddr>().unwrap(),
            peer_fqdn: None,
            peer_tls_name: None,
            input_name: None,
            ruleset: std::sync::Weak::new(),
        }
    }

    #[test]
    fn construct_rejects_duplicate_name_case_insensitively() {
        let mut reg = RulesetRegistry::new();
        reg.construct("Main").unwrap();
        assert!(reg.construct("main").is_err());
    }

    #[test]
    fn get_is_case_insensitive() {
        let mut reg = RulesetRegistry::new();
        reg.construct("Main").unwrap();
        assert!(reg.get("MAIN").is_some());
    }

    #[test]
    fn zero_action_rule_is_dropped() {
        let mut reg = RulesetRegistry::new();
        let rs = reg.construct("main").unwrap();

        reg.add_rule(&rs, Rule::new(Vec::new()));

        assert_eq!(rs.rule_count(), 0);
    }

    #[test]
    fn finalize_picks_first_ruleset_as_default_if_unset() {
        let mut reg = RulesetRegistry::new();
        reg.construct("first").unwrap();
        reg.construct("second").unwrap();

        reg.finalize();

        assert_eq!(reg.default_ruleset().unwrap().name(), "first");
    }

    #[test]
    fn set_default_unknown_name_is_a_warned_no_op() {
        let mut reg = RulesetRegistry::new();
        reg.construct("main").unwrap();
        reg.set_default("main");

        reg.set_default("does-not-exist");

        assert_eq!(reg.default_ruleset().unwrap().name(), "main");
    }

    #[test]
    fn set_current_unknown_name_is_a_warned_no_op() {
        let mut reg = RulesetRegistry::new();
        reg.construct("main").unwrap();

        assert!(reg.set_current("does-not-exist").is_none());
        assert_eq!(reg.set_current("main").unwrap().name(), "main");
    }

    #[test]
    fn add_parser_rejects_unregistered_name() {
        let mut reg = RulesetRegistry::new();
        let rs = reg.construct("main").unwrap();

        let err = reg.add_parser(&rs, "made-up-format").unwrap_err();
        assert!(matches!(err, Error::ParserNotFound(name) if name == "made-up-format"));
    }

    #[test]
    fn add_parser_accepts_known_name_case_insensitively() {
        let mut reg = RulesetRegistry::new();
        let rs = reg.construct("main").unwrap();

        reg.add_parser(&rs, "RFC5424").unwrap();
        reg.add_parser(&rs, "json").unwrap();
    }

    #[test]
    fn attach_queue_requires_current_ruleset() {
        let reg = RulesetRegistry::new();
        assert!(matches!(
            reg.attach_queue(None),
            Err(Error::NoCurrRuleset)
        ));
    }

    #[test]
    fn attach_queue_rejects_duplicate() {
        let mut reg = RulesetRegistry::new();
        reg.construct("main").unwrap();

        reg.attach_queue(Some("main")).unwrap();
        assert!(matches!(
            reg.attach_queue(Some("main")),
            Err(Error::RulesQueueExists(_))
        ));
    }

    #[test]
    fn destroy_all_clears_default_before_rulesets() {
        let mut reg = RulesetRegistry::new();
        reg.construct("main").unwrap();
        reg.finalize();

        reg.destroy_all();

        assert!(reg.default_ruleset().is_none());
        assert!(reg.get("main").is_none());
    }

    #[test]
    fn apply_rule_runs_actions_in_order_until_discard() {
        let mut reg = RulesetRegistry::new();
        let rs = reg.construct("main").unwrap();

        let queue = Arc::new(InMemoryQueue::new(4));
        reg.add_rule(
            &rs,
            Rule::new(vec![Box::new(QueueAction::new(queue.clone()))]),
        );

        let disposition = rs.apply_rule(0, &sample_message()).unwrap();
        assert_eq!(disposition, Disposition::Continue);
        assert_eq!(queue.dequeue().unwrap(), b"hi");
    }

    #[test]
    fn iterate_all_actions_visits_in_insertion_order() {
        let mut reg = RulesetRegistry::new();
        let a = reg.construct("a").unwrap();
        let b = reg.construct("b").unwrap();

        let queue = Arc::new(InMemoryQueue::new(4));
        reg.add_rule(&a, Rule::new(vec![Box::new(QueueAction::new(queue.clone()))]));
        reg.add_rule(&b, Rule::new(vec![Box::new(QueueAction::new(queue))]));

        let mut seen = Vec::new();
        reg.iterate_all_actions(|name, rule_idx, action_idx, _action| {
            seen.push((name.to_string(), rule_idx, action_idx));
        });

        assert_eq!(
            seen,
            vec![("a".to_string(), 0, 0), ("b".to_string(), 0, 0)]
        );
    }
}
