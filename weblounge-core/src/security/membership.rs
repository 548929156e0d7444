use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use super::authority::Authority;
use super::error::{Result, SecurityError};
use super::group::GroupId;

/// Something that can be a member of a group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "id")]
pub enum Member {
    User(String),
    Group(GroupId),
}

impl Member {
    pub fn user(login: impl Into<String>) -> Self {
        Member::User(login.into())
    }

    pub fn authority(&self) -> Authority {
        match self {
            Member::User(login) => Authority::user(login.clone()),
            Member::Group(group) => group.authority(),
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::User(login) => write!(f, "user '{login}'"),
            Member::Group(group) => write!(f, "group '{group}'"),
        }
    }
}

impl From<GroupId> for Member {
    fn from(group: GroupId) -> Self {
        Member::Group(group)
    }
}

/// Both directions of every group membership edge.
///
/// `members` answers "who is in this group", `memberships` answers "which
/// groups is this member in". The two maps are only ever changed together by
/// [`add_member`](Self::add_member) and [`remove_member`](Self::remove_member).
#[derive(Debug, Clone, Default)]
pub struct MembershipGraph {
    members: BTreeMap<GroupId, BTreeSet<Member>>,
    memberships: BTreeMap<Member, BTreeSet<GroupId>>,
}

impl MembershipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `member` a member of `group`.
    ///
    /// Returns `Ok(false)` if the edge already existed. Adding a group to a
    /// group it already (transitively) belongs to, or to itself, fails.
    pub fn add_member(&mut self, group: &GroupId, member: Member) -> Result<bool> {
        if let Member::Group(candidate) = &member {
            if candidate == group
                || self
                    .group_closure(&Member::Group(group.clone()))
                    .contains(candidate)
            {
                return Err(SecurityError::CyclicGroupMembership {
                    group: group.to_string(),
                    member: candidate.to_string(),
                });
            }
        }

        let added = self
            .members
            .entry(group.clone())
            .or_default()
            .insert(member.clone());
        self.memberships
            .entry(member)
            .or_default()
            .insert(group.clone());
        Ok(added)
    }

    /// Remove `member` from `group`. Returns `false` if it was not a member.
    pub fn remove_member(&mut self, group: &GroupId, member: &Member) -> bool {
        let removed = match self.members.get_mut(group) {
            Some(members) => {
                let removed = members.remove(member);
                if members.is_empty() {
                    self.members.remove(group);
                }
                removed
            }
            None => false,
        };
        if let Some(groups) = self.memberships.get_mut(member) {
            groups.remove(group);
            if groups.is_empty() {
                self.memberships.remove(member);
            }
        }
        removed
    }

    /// Drop every edge touching `member`, in both directions. A group that is
    /// removed also loses its own members.
    pub fn remove_node(&mut self, member: &Member) {
        for group in self.memberships(member) {
            self.remove_member(&group, member);
        }
        if let Member::Group(group) = member {
            for m in self.members(group) {
                self.remove_member(group, &m);
            }
        }
    }

    /// Direct members of `group`
    pub fn members(&self, group: &GroupId) -> Vec<Member> {
        self.members
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Groups `member` directly belongs to
    pub fn memberships(&self, member: &Member) -> Vec<GroupId> {
        self.memberships
            .get(member)
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member_of(&self, member: &Member, group: &GroupId) -> bool {
        self.memberships
            .get(member)
            .is_some_and(|groups| groups.contains(group))
    }

    /// Every group `member` belongs to, directly or through other groups.
    /// The traversal keeps a visited set and terminates on any input.
    pub fn group_closure(&self, member: &Member) -> BTreeSet<GroupId> {
        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<GroupId> = self.memberships(member).into();
        while let Some(group) = queue.pop_front() {
            if closure.insert(group.clone()) {
                queue.extend(self.memberships(&Member::Group(group)));
            }
        }
        closure
    }

    /// Number of membership edges
    pub fn len(&self) -> usize {
        self.members.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreeset;

    fn g(id: &str) -> GroupId {
        id.parse().unwrap()
    }

    #[test]
    fn test_edges_are_kept_in_both_directions() {
        let mut graph = MembershipGraph::new();
        let jane = Member::user("jane");
        assert!(graph.add_member(&g("site:editors"), jane.clone()).unwrap());
        assert!(!graph.add_member(&g("site:editors"), jane.clone()).unwrap());

        assert_eq!(graph.members(&g("site:editors")), vec![jane.clone()]);
        assert_eq!(graph.memberships(&jane), vec![g("site:editors")]);
        assert!(graph.is_member_of(&jane, &g("site:editors")));

        assert!(graph.remove_member(&g("site:editors"), &jane));
        assert!(graph.members(&g("site:editors")).is_empty());
        assert!(graph.memberships(&jane).is_empty());
        assert!(graph.is_empty());
        assert!(!graph.remove_member(&g("site:editors"), &jane));
    }

    #[test]
    fn test_group_closure_follows_nested_groups() {
        let mut graph = MembershipGraph::new();
        let g1 = Member::Group(g("test:g1"));
        graph.add_member(&g("test:g2"), g1.clone()).unwrap();
        graph
            .add_member(&g("test:g3"), Member::Group(g("test:g2")))
            .unwrap();

        let closure = graph.group_closure(&g1);
        assert_eq!(closure, btreeset! {g("test:g2"), g("test:g3")});

        graph.remove_member(&g("test:g2"), &g1);
        assert!(graph.group_closure(&g1).is_empty());
        assert_eq!(
            graph.group_closure(&Member::Group(g("test:g2"))),
            btreeset! {g("test:g3")}
        );
    }

    #[test]
    fn test_cyclic_membership_is_rejected() {
        let mut graph = MembershipGraph::new();
        graph
            .add_member(&g("test:b"), Member::Group(g("test:a")))
            .unwrap();
        graph
            .add_member(&g("test:c"), Member::Group(g("test:b")))
            .unwrap();

        let result = graph.add_member(&g("test:a"), Member::Group(g("test:c")));
        assert!(matches!(
            result,
            Err(SecurityError::CyclicGroupMembership { .. })
        ));
        let result = graph.add_member(&g("test:a"), Member::Group(g("test:a")));
        assert!(result.is_err());

        // Nothing was half-added
        assert!(graph.members(&g("test:a")).is_empty());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_remove_node_drops_all_edges() {
        let mut graph = MembershipGraph::new();
        let editors = g("site:editors");
        graph.add_member(&editors, Member::user("jane")).unwrap();
        graph.add_member(&editors, Member::user("joe")).unwrap();
        graph
            .add_member(&g("site:staff"), Member::Group(editors.clone()))
            .unwrap();

        graph.remove_node(&Member::Group(editors.clone()));
        assert!(graph.memberships(&Member::user("jane")).is_empty());
        assert!(graph.members(&g("site:staff")).is_empty());
        assert!(graph.is_empty());
    }
}
