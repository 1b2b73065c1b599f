use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::{normalize_id, Approver, ApproverRole};
use crate::domain::expense::Requester;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no approver holds role `{role}` for requester `{requester_id}`")]
    NoApprovers { role: ApproverRole, requester_id: String },
    #[error("approver directory unavailable: {0}")]
    Unavailable(String),
}

/// Maps a role token to the people who may act for it on a requester's
/// behalf.
pub trait ApproverResolver: Send + Sync {
    fn resolve(
        &self,
        role: ApproverRole,
        requester: &Requester,
    ) -> Result<Vec<Approver>, ResolveError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMember {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Option<ApproverRole>,
    #[serde(default)]
    pub manager_id: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
}

impl DirectoryMember {
    fn as_approver(&self, role: ApproverRole) -> Approver {
        Approver {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role,
            delegated: false,
            delegated_by: None,
            escalated: false,
        }
    }
}

/// Resolves approvers from an in-process organization directory. Managers
/// are found by walking the requester's reporting line; finance and
/// executive approvers by role membership.
#[derive(Clone, Debug, Default)]
pub struct DirectoryApproverResolver {
    members_by_id: HashMap<String, DirectoryMember>,
}

impl DirectoryApproverResolver {
    pub fn new(members: Vec<DirectoryMember>) -> Self {
        let members_by_id =
            members.into_iter().map(|member| (normalize_id(&member.id), member)).collect();
        Self { members_by_id }
    }

    pub fn member(&self, id: &str) -> Option<&DirectoryMember> {
        self.members_by_id.get(&normalize_id(id))
    }

    fn manager_chain(&self, requester: &Requester) -> Vec<String> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let requester_key = normalize_id(&requester.id);
        visited.insert(requester_key.clone());

        let mut next = requester.manager_id.clone().or_else(|| {
            self.members_by_id.get(&requester_key).and_then(|member| member.manager_id.clone())
        });

        while let Some(manager_id) = next {
            let manager_key = normalize_id(&manager_id);
            if !visited.insert(manager_key.clone()) {
                break;
            }
            chain.push(manager_key.clone());
            next =
                self.members_by_id.get(&manager_key).and_then(|member| member.manager_id.clone());
        }

        chain
    }

    fn resolve_manager(&self, requester: &Requester) -> Vec<Approver> {
        if let Some(manager) =
            self.manager_chain(requester).iter().find_map(|id| self.members_by_id.get(id))
        {
            return vec![manager.as_approver(ApproverRole::Manager)];
        }

        let department = requester
            .department
            .clone()
            .or_else(|| self.member(&requester.id).and_then(|member| member.department.clone()))
            .map(|department| normalize_id(&department));
        let managers = self.members_with_role(ApproverRole::Manager, requester);
        let in_department: Vec<Approver> = managers
            .iter()
            .filter(|approver| {
                department.is_some()
                    && self
                        .member(&approver.id)
                        .and_then(|member| member.department.as_deref())
                        .map(normalize_id)
                        == department
            })
            .cloned()
            .collect();

        if in_department.is_empty() {
            managers
        } else {
            in_department
        }
    }

    fn members_with_role(&self, role: ApproverRole, requester: &Requester) -> Vec<Approver> {
        let requester_key = normalize_id(&requester.id);
        let mut approvers: Vec<Approver> = self
            .members_by_id
            .iter()
            .filter(|(key, member)| member.role == Some(role) && **key != requester_key)
            .map(|(_, member)| member.as_approver(role))
            .collect();
        approvers.sort_by(|left, right| left.id.cmp(&right.id));
        approvers
    }
}

impl ApproverResolver for DirectoryApproverResolver {
    fn resolve(
        &self,
        role: ApproverRole,
        requester: &Requester,
    ) -> Result<Vec<Approver>, ResolveError> {
        let approvers = match role {
            ApproverRole::Manager => self.resolve_manager(requester),
            ApproverRole::Finance | ApproverRole::Executive => {
                self.members_with_role(role, requester)
            }
        };

        if approvers.is_empty() {
            return Err(ResolveError::NoApprovers { role, requester_id: requester.id.clone() });
        }

        Ok(approvers)
    }
}
