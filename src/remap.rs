//! Token remap resolution
//!
//! Consumes two metadata envelopes (old and new) and assigns one canonical
//! identity per connected component of historically-aliased tokens, per
//! scope. Components come from a disjoint-set over every token appearing in
//! either envelope; canonical election is a deterministic tie-break applied
//! once per component after all unions.

use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, BTreeSet};

use crate::meta::{MetadataEnvelope, Scope};

/// Canonical-identity lookup for both snapshot sides, per scope
#[derive(Debug, Clone, Default)]
pub struct TokenRemap {
    scopes: BTreeMap<Scope, ScopeRemap>,
    diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct ScopeRemap {
    /// Every member token of every component, mapped to its canonical
    canonical: BTreeMap<String, String>,
    /// canonical -> sorted members observed via the old envelope
    old_members: BTreeMap<String, Vec<String>>,
    /// canonical -> sorted members observed via the new envelope
    new_members: BTreeMap<String, Vec<String>>,
}

impl TokenRemap {
    /// Build the remap once per run. Idempotent and deterministic for the
    /// same two envelopes.
    pub fn build(old: &MetadataEnvelope, new: &MetadataEnvelope) -> Self {
        let mut remap = TokenRemap::default();
        for scope in Scope::ALL {
            let scoped = build_scope(scope, old, new, &mut remap.diagnostics);
            remap.scopes.insert(scope, scoped);
        }
        remap
    }

    /// Canonical identity for a token as seen from the old snapshot
    pub fn canonical_for_old(&self, scope: Scope, token: &str) -> Option<&str> {
        self.lookup(scope, token)
    }

    /// Canonical identity for a token as seen from the new snapshot
    pub fn canonical_for_new(&self, scope: Scope, token: &str) -> Option<&str> {
        self.lookup(scope, token)
    }

    // Membership in a component is side-independent; the old/new split only
    // affects canonical preference and the member listings.
    fn lookup(&self, scope: Scope, token: &str) -> Option<&str> {
        self.scopes
            .get(&scope)
            .and_then(|s| s.canonical.get(token))
            .map(String::as_str)
    }

    /// Sorted members of a canonical component observed via the old envelope
    pub fn old_members(&self, scope: Scope, canonical: &str) -> &[String] {
        self.scopes
            .get(&scope)
            .and_then(|s| s.old_members.get(canonical))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sorted members of a canonical component observed via the new envelope
    pub fn new_members(&self, scope: Scope, canonical: &str) -> &[String] {
        self.scopes
            .get(&scope)
            .and_then(|s| s.new_members.get(canonical))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sorted canonical tokens of one scope
    pub fn canonicals(&self, scope: Scope) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .scopes
            .get(&scope)
            .map(|s| s.old_members.keys().chain(s.new_members.keys()))
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Resolution-ambiguity findings: aliases claimed by more than one
    /// current token within one scope. Resolved deterministically (the
    /// entries union into one component) but surfaced, never dropped.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }
}

fn build_scope(
    scope: Scope,
    old: &MetadataEnvelope,
    new: &MetadataEnvelope,
    diagnostics: &mut Vec<String>,
) -> ScopeRemap {
    // Index every token appearing on either side.
    let mut tokens: BTreeSet<String> = BTreeSet::new();
    for env in [old, new] {
        for hist in env.entries(scope).values() {
            tokens.insert(hist.current.clone());
            for alias in &hist.past {
                tokens.insert(alias.name.clone());
            }
        }
    }
    let index: BTreeMap<&str, usize> = tokens
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();

    let mut uf: UnionFind<usize> = UnionFind::new(tokens.len());
    let mut sides = [BTreeSet::<String>::new(), BTreeSet::<String>::new()];
    let mut currents = [BTreeSet::<String>::new(), BTreeSet::<String>::new()];
    let mut claimed_by: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    // Envelope maps are sorted, so union order is reproducible.
    for (env, side) in [(old, 0usize), (new, 1usize)] {
        for hist in env.entries(scope).values() {
            currents[side].insert(hist.current.clone());
            sides[side].insert(hist.current.clone());
            for alias in &hist.past {
                sides[side].insert(alias.name.clone());
                claimed_by
                    .entry(alias.name.clone())
                    .or_default()
                    .insert(hist.current.clone());
                uf.union(index[hist.current.as_str()], index[alias.name.as_str()]);
            }
        }
    }
    let (old_side, new_side) = (&sides[0], &sides[1]);
    let (old_currents, new_currents) = (&currents[0], &currents[1]);

    for (token, claims) in &claimed_by {
        if claims.len() > 1 {
            diagnostics.push(format!(
                "{}: token `{}` is claimed by multiple current tokens: {}",
                scope,
                token,
                claims
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }

    // Group members per component. Iterating the sorted token set keeps each
    // member list sorted without a second pass.
    let mut components: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for token in &tokens {
        let rep = uf.find_mut(index[token.as_str()]);
        components.entry(rep).or_default().push(token.as_str());
    }

    let mut scoped = ScopeRemap::default();
    for members in components.values() {
        let canonical = elect_canonical(members, new_currents, old_currents);
        for member in members {
            scoped
                .canonical
                .insert(member.to_string(), canonical.to_string());
        }
        let olds: Vec<String> = members
            .iter()
            .filter(|m| old_side.contains(**m))
            .map(|m| m.to_string())
            .collect();
        let news: Vec<String> = members
            .iter()
            .filter(|m| new_side.contains(**m))
            .map(|m| m.to_string())
            .collect();
        if !olds.is_empty() {
            scoped.old_members.insert(canonical.to_string(), olds);
        }
        if !news.is_empty() {
            scoped.new_members.insert(canonical.to_string(), news);
        }
    }
    scoped
}

/// Fixed preference order: the new snapshot's current token, else the old
/// snapshot's, else the lexicographically smallest member. Ties within the
/// first two classes also break lexicographically.
fn elect_canonical<'a>(
    members: &[&'a str],
    new_currents: &BTreeSet<String>,
    old_currents: &BTreeSet<String>,
) -> &'a str {
    if let Some(m) = members.iter().find(|m| new_currents.contains(**m)) {
        return *m;
    }
    if let Some(m) = members.iter().find(|m| old_currents.contains(**m)) {
        return *m;
    }
    members[0]
}
