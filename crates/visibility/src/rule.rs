//! Visibility rules compiled into a small boolean tree.

use appsearch_core_types::PackageIdentifier;

use crate::config::{is_enterprise_set, PermissionSet, SchemaVisibility, VisibilityConfig};

/// Single check evaluated against the caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Clause {
    /// Caller package and certificate match one of the entries.
    PackageMatch(Vec<PackageIdentifier>),
    /// Caller holds every permission of at least one set.
    PermissionMatch(Vec<PermissionSet>),
    /// Caller can see the target package and the target certificate matches.
    PublicMatch(PackageIdentifier),
}

/// Children of a composite node. Never empty.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Children(Vec<VisibilityRule>);

impl Children {
    fn new(children: Vec<VisibilityRule>) -> Option<Self> {
        if children.is_empty() {
            None
        } else {
            Some(Self(children))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &VisibilityRule> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VisibilityRule {
    Leaf(Clause),
    And(Children),
    Or(Children),
}

impl VisibilityRule {
    /// Conjunction of `children`; `None` when there is nothing to require.
    pub fn all(children: Vec<VisibilityRule>) -> Option<Self> {
        Children::new(children).map(VisibilityRule::And)
    }

    /// Disjunction of `children`; `None` when nothing could grant access.
    pub fn any(children: Vec<VisibilityRule>) -> Option<Self> {
        Children::new(children).map(VisibilityRule::Or)
    }

    /// Evaluates the tree, short-circuiting on the first decisive child.
    pub fn evaluate<F>(&self, check: &mut F) -> bool
    where
        F: FnMut(&Clause) -> bool,
    {
        match self {
            VisibilityRule::Leaf(clause) => check(clause),
            VisibilityRule::And(children) => children.iter().all(|child| child.evaluate(check)),
            VisibilityRule::Or(children) => children.iter().any(|child| child.evaluate(check)),
        }
    }
}

/// Leaves for every non-empty clause of `config`.
///
/// Enterprise-marked permission sets are left out: they are only ever
/// evaluated on the enterprise path.
fn clauses_of(config: &VisibilityConfig) -> Vec<VisibilityRule> {
    let mut leaves = Vec::new();
    if !config.allowed_packages.is_empty() {
        leaves.push(VisibilityRule::Leaf(Clause::PackageMatch(
            config.allowed_packages.iter().cloned().collect(),
        )));
    }
    let permission_sets: Vec<PermissionSet> = config
        .required_permission_sets
        .iter()
        .filter(|set| !set.is_empty() && !is_enterprise_set(set))
        .cloned()
        .collect();
    if !permission_sets.is_empty() {
        leaves.push(VisibilityRule::Leaf(Clause::PermissionMatch(permission_sets)));
    }
    if let Some(target) = &config.publicly_visible_target {
        leaves.push(VisibilityRule::Leaf(Clause::PublicMatch(target.clone())));
    }
    leaves
}

/// Schema visibility prepared for repeated evaluation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompiledVisibility {
    pub displayed_by_system: bool,
    /// OR of the primary clauses and every AND-config. `None` grants nothing.
    pub rule: Option<VisibilityRule>,
    /// Permission sets carrying an enterprise marker, from every config.
    pub enterprise_sets: Vec<PermissionSet>,
}

impl CompiledVisibility {
    pub fn compile(visibility: &SchemaVisibility) -> Self {
        let mut branches = clauses_of(&visibility.config);
        for and_config in &visibility.visible_to_configs {
            if let Some(conjunction) = VisibilityRule::all(clauses_of(and_config)) {
                branches.push(conjunction);
            }
        }

        let enterprise_sets = std::iter::once(&visibility.config)
            .chain(visibility.visible_to_configs.iter())
            .flat_map(|config| config.required_permission_sets.iter())
            .filter(|set| is_enterprise_set(set))
            .cloned()
            .collect();

        Self {
            displayed_by_system: !visibility.config.not_displayed_by_system,
            rule: VisibilityRule::any(branches),
            enterprise_sets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Permission;

    #[test]
    fn empty_composites_cannot_be_built() {
        assert!(VisibilityRule::all(Vec::new()).is_none());
        assert!(VisibilityRule::any(Vec::new()).is_none());
    }

    #[test]
    fn and_config_with_nothing_specified_is_dropped() {
        let visibility = SchemaVisibility::default().with_visible_to(VisibilityConfig::default());
        let compiled = CompiledVisibility::compile(&visibility);
        assert!(compiled.rule.is_none());
    }

    #[test]
    fn and_node_requires_every_leaf() {
        let config = VisibilityConfig::default()
            .allow_package(PackageIdentifier::new("com.e", vec![4]))
            .require_permissions([Permission::ReadSms]);
        let rule = VisibilityRule::all(clauses_of(&config)).unwrap();

        let mut only_packages = |clause: &Clause| matches!(clause, Clause::PackageMatch(_));
        assert!(!rule.evaluate(&mut only_packages));
        let mut everything = |_: &Clause| true;
        assert!(rule.evaluate(&mut everything));
    }

    #[test]
    fn enterprise_sets_are_split_out() {
        let config = VisibilityConfig::default()
            .require_permissions([Permission::EnterpriseAccess, Permission::ReadContacts])
            .require_permissions([Permission::ReadCalendar]);
        let compiled = CompiledVisibility::compile(&SchemaVisibility::new(config));
        assert_eq!(compiled.enterprise_sets.len(), 1);
        match compiled.rule {
            Some(VisibilityRule::Or(children)) => assert_eq!(children.len(), 1),
            other => panic!("unexpected rule {other:?}"),
        }
    }
}
