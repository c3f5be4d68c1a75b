//! Account directory: resolves principals by id or phone number.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{PrincipalId, Role, Status};

/// An account holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub name: String,
    /// Unique, used to find transfer counterparties.
    pub phone: String,
    pub role: Role,
    pub status: Status,
    pub is_deleted: bool,
}

impl Principal {
    /// Status a freshly registered principal starts in. Agents wait for approval.
    pub fn initial_status(role: Role) -> Status {
        match role {
            Role::Agent => Status::Pending,
            Role::User | Role::Admin => Status::Active,
        }
    }
}

/// In-memory index of principals.
#[derive(Debug, Default)]
pub struct Directory {
    principals: HashMap<PrincipalId, Principal>,
    by_phone: HashMap<String, PrincipalId>,
    next_id: PrincipalId,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_by_id(&self, id: PrincipalId) -> Option<&Principal> {
        self.principals.get(&id)
    }

    pub fn find_by_phone(&self, phone: &str) -> Option<&Principal> {
        self.id_for_phone(phone)
            .and_then(|id| self.principals.get(&id))
    }

    pub fn id_for_phone(&self, phone: &str) -> Option<PrincipalId> {
        self.by_phone.get(phone.trim()).copied()
    }

    pub fn contains_phone(&self, phone: &str) -> bool {
        self.by_phone.contains_key(phone.trim())
    }

    /// Every principal, deleted ones included, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Principal> {
        self.principals.values()
    }

    /// Hand out the next id. Ids start at 1 and are never reused.
    pub(crate) fn allocate_id(&mut self) -> PrincipalId {
        self.next_id += 1;
        self.next_id
    }

    /// Insert or replace a principal. Phone numbers are immutable once indexed.
    pub(crate) fn put(&mut self, principal: Principal) {
        self.by_phone
            .entry(principal.phone.clone())
            .or_insert(principal.id);
        self.principals.insert(principal.id, principal);
    }
}
