//! Derived lifecycle view
//!
//! A pure function of the session, the pointer and cache snapshots. Nothing here
//! is cached; the view is recomputed whenever it is asked for.

use super::session::ActiveMatch;
use crate::ids::{ProfileStatus, TokenId};
use crate::reader::{EscrowState, Profile};
use crate::tracker::{MutationKind, TrackerView, TransactionTracker};

use ethers::types::{Address, U256};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Tri-state flag; `Unknown` while any input is still loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Yes,
    No,
    Unknown,
}

impl Flag {
    pub fn is_yes(self) -> bool {
        self == Flag::Yes
    }

    pub fn is_no(self) -> bool {
        self == Flag::No
    }
}

impl From<Option<bool>> for Flag {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Flag::Yes,
            Some(false) => Flag::No,
            None => Flag::Unknown,
        }
    }
}

/// Which side of the match the local participant is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    SignedOut,
    Resolving,
    NoProfile,
    ProfileReady,
    InPool,
    Matched,
    Escrowed,
    Accepted,
    SocialsExchanged,
}

impl LifecycleStage {
    pub fn ordinal(self) -> i64 {
        self as i64
    }
}

/// Which intents are currently worth offering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionGates {
    pub mint: bool,
    pub join_pool: bool,
    pub deposit: bool,
    pub accept: bool,
    pub exchange: bool,
    pub request_matchmaking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    pub match_id: String,
    pub partner_token_id: String,
    pub partner_profile: Option<Profile>,
    pub partner_contact: Option<String>,
    pub my_contact: Option<String>,
}

/// Everything the UI needs to render the current session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleView {
    pub stage: LifecycleStage,
    pub address: Option<String>,
    pub token_id: Option<String>,
    pub profile: Option<Profile>,
    pub in_pool: Flag,
    pub pool_size: Option<String>,
    pub match_counter: Option<String>,
    pub is_admin: bool,
    pub active_match: Option<MatchSummary>,
    pub my_role: Option<Role>,
    pub has_i_deposited: Flag,
    pub has_i_accepted: Flag,
    pub both_deposited: Flag,
    pub both_accepted: Flag,
    pub gates: ActionGates,
    pub trackers: BTreeMap<MutationKind, TrackerView>,
    pub invalidation_epoch: u64,
}

/// Inputs to [`derive`], gathered from the session and reader snapshots
#[derive(Debug, Default)]
pub struct ViewInputs<'a> {
    pub address: Option<Address>,
    pub identity: Option<ProfileStatus>,
    pub pointer: Option<ActiveMatch>,
    pub profile: Option<Profile>,
    pub in_pool: Option<bool>,
    pub pool_size: Option<U256>,
    pub match_counter: Option<U256>,
    pub administrator: Option<Address>,
    pub participants: Option<(TokenId, TokenId)>,
    pub escrow: Option<EscrowState>,
    pub partner_profile: Option<Profile>,
    pub my_contact: Option<String>,
    pub partner_contact: Option<String>,
    pub trackers: Option<&'a HashMap<MutationKind, TransactionTracker>>,
    pub invalidation_epoch: u64,
}

impl ViewInputs<'_> {
    fn in_flight(&self, kind: MutationKind) -> bool {
        self.trackers
            .and_then(|trackers| trackers.get(&kind))
            .map_or(false, |tracker| tracker.is_in_flight())
    }
}

/// Role of `identity` in a match with participants `(user_a, user_b)`
pub fn role_of(identity: Option<TokenId>, participants: Option<(TokenId, TokenId)>) -> Option<Role> {
    let identity = identity?;
    let (user_a, user_b) = participants?;
    if identity == user_a {
        Some(Role::A)
    } else if identity == user_b {
        Some(Role::B)
    } else {
        None
    }
}

pub fn derive(inputs: &ViewInputs<'_>) -> LifecycleView {
    let token = inputs.identity.and_then(|status| status.token());
    let escrow = inputs.escrow;

    let my_role = inputs
        .pointer
        .and_then(|_| role_of(token, inputs.participants));

    let has_i_deposited = match (my_role, escrow) {
        (Some(Role::A), Some(e)) => Flag::from(Some(e.deposited_a)),
        (Some(Role::B), Some(e)) => Flag::from(Some(e.deposited_b)),
        _ => Flag::Unknown,
    };
    let has_i_accepted = match (my_role, escrow) {
        (Some(Role::A), Some(e)) => Flag::from(Some(e.accepted_a)),
        (Some(Role::B), Some(e)) => Flag::from(Some(e.accepted_b)),
        _ => Flag::Unknown,
    };
    let both_deposited = Flag::from(escrow.map(|e| e.both_deposited()));
    let both_accepted = Flag::from(escrow.map(|e| e.both_accepted()));

    let is_admin = match (inputs.address, inputs.administrator) {
        (Some(address), Some(admin)) => address == admin,
        _ => false,
    };

    let my_contact = inputs.my_contact.clone().filter(|c| !c.is_empty());
    let partner_contact = inputs.partner_contact.clone().filter(|c| !c.is_empty());

    let stage = match (inputs.address, inputs.identity) {
        (None, _) => LifecycleStage::SignedOut,
        (Some(_), None) => LifecycleStage::Resolving,
        (Some(_), Some(ProfileStatus::NoProfile)) => LifecycleStage::NoProfile,
        (Some(_), Some(ProfileStatus::Profile(_))) => match inputs.pointer {
            Some(_) if both_accepted.is_yes() && my_contact.is_some() => {
                LifecycleStage::SocialsExchanged
            }
            Some(_) if both_accepted.is_yes() => LifecycleStage::Accepted,
            Some(_) if both_deposited.is_yes() => LifecycleStage::Escrowed,
            Some(_) => LifecycleStage::Matched,
            None if inputs.in_pool == Some(true) => LifecycleStage::InPool,
            None => LifecycleStage::ProfileReady,
        },
    };

    let has_match = inputs.pointer.is_some();
    let gates = ActionGates {
        mint: inputs.identity == Some(ProfileStatus::NoProfile)
            && !inputs.in_flight(MutationKind::MintProfile),
        join_pool: token.is_some()
            && inputs.in_pool == Some(false)
            && !inputs.in_flight(MutationKind::JoinPool),
        deposit: has_match && has_i_deposited.is_no() && !inputs.in_flight(MutationKind::Deposit),
        accept: has_match
            && both_deposited.is_yes()
            && has_i_accepted.is_no()
            && !inputs.in_flight(MutationKind::Accept),
        exchange: has_match
            && both_accepted.is_yes()
            && !inputs.in_flight(MutationKind::ExchangeSocials),
        request_matchmaking: is_admin
            && inputs.pool_size.map_or(false, |size| size >= U256::from(2u64))
            && !inputs.in_flight(MutationKind::RequestMatchmaking),
    };

    let trackers = inputs
        .trackers
        .map(|trackers| {
            trackers
                .iter()
                .map(|(kind, tracker)| (*kind, tracker.view()))
                .collect()
        })
        .unwrap_or_default();

    LifecycleView {
        stage,
        address: inputs.address.map(|a| format!("{:?}", a)),
        token_id: token.map(|t| t.to_string()),
        profile: inputs.profile.clone(),
        in_pool: Flag::from(inputs.in_pool),
        pool_size: inputs.pool_size.map(|n| n.to_string()),
        match_counter: inputs.match_counter.map(|n| n.to_string()),
        is_admin,
        active_match: inputs.pointer.map(|pointer| MatchSummary {
            match_id: pointer.match_id.to_string(),
            partner_token_id: pointer.partner.to_string(),
            partner_profile: inputs.partner_profile.clone(),
            partner_contact,
            my_contact,
        }),
        my_role,
        has_i_deposited,
        has_i_accepted,
        both_deposited,
        both_accepted,
        gates,
        trackers,
        invalidation_epoch: inputs.invalidation_epoch,
    }
}
