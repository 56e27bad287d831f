// src/slot_guard.rs

//! Appointment conflict guard.
//!
//! A doctor can hold at most one appointment per timestamp. The guard checks
//! for a clash before writing, and if a concurrent request wins the race
//! between that check and the write, the storage unique constraint rejects
//! the loser. Both paths surface as [`GuardError::SlotConflict`].

use async_trait::async_trait;
use chrono::{NaiveDateTime, SubsecRound};

/// A (doctor, timestamp) pair. Equality is exact, at microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub doctor_id: i64,
    pub at: NaiveDateTime,
}

impl Slot {
    pub fn new(doctor_id: i64, at: NaiveDateTime) -> Self {
        // postgres TIMESTAMP keeps microseconds; compare at the same precision
        Self {
            doctor_id,
            at: at.trunc_subsecs(6),
        }
    }
}

/// Everything written for one appointment row.
#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentDraft {
    pub slot: Slot,
    pub patient_id: Option<i64>,
    pub patient_name: Option<String>,
    pub patient_contact: Option<String>,
    pub status: String,
    pub notes: Option<String>,
    pub company_id: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The (doctor, timestamp) unique constraint rejected the write.
    #[error("slot already taken")]
    SlotTaken,
    #[error("{0} not found")]
    MissingReference(&'static str),
    #[error("db error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("slot already booked for this doctor at that time")]
    SlotConflict,
    #[error("appointment not found")]
    NotFound,
    #[error("{0} not found")]
    MissingReference(&'static str),
    #[error("{0}")]
    Store(String),
}

impl From<StoreError> for GuardError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SlotTaken => GuardError::SlotConflict,
            StoreError::MissingReference(what) => GuardError::MissingReference(what),
            StoreError::Db(e) => GuardError::Store(format!("db error: {e}")),
        }
    }
}

/// Storage the guard runs against. One value is one unit of work: a failed
/// write must leave nothing behind once the value is dropped.
#[async_trait]
pub trait SlotStore: Send {
    /// Id of an appointment already holding `slot`, ignoring `exclude`.
    async fn find_clash(
        &mut self,
        slot: Slot,
        exclude: Option<i64>,
    ) -> Result<Option<i64>, StoreError>;

    async fn insert(&mut self, draft: &AppointmentDraft) -> Result<i64, StoreError>;

    /// Returns `Ok(false)` when no appointment has `id`.
    async fn update(&mut self, id: i64, draft: &AppointmentDraft) -> Result<bool, StoreError>;
}

/// Book `draft.slot`, either as a new appointment or by rewriting `existing`.
///
/// Returns the id of the written appointment.
pub async fn reserve_slot<S>(
    store: &mut S,
    draft: &AppointmentDraft,
    existing: Option<i64>,
) -> Result<i64, GuardError>
where
    S: SlotStore + ?Sized,
{
    let slot = draft.slot;

    if let Some(holder) = store.find_clash(slot, existing).await? {
        tracing::info!(
            doctor_id = slot.doctor_id,
            at = %slot.at,
            holder,
            "slot conflict at pre-check"
        );
        return Err(GuardError::SlotConflict);
    }

    let written = match existing {
        None => store.insert(draft).await,
        Some(id) => match store.update(id, draft).await {
            Ok(true) => Ok(id),
            Ok(false) => return Err(GuardError::NotFound),
            Err(e) => Err(e),
        },
    };

    match written {
        Ok(id) => Ok(id),
        Err(StoreError::SlotTaken) => {
            tracing::warn!(
                doctor_id = slot.doctor_id,
                at = %slot.at,
                "slot taken by a concurrent booking"
            );
            Err(GuardError::SlotConflict)
        }
        Err(e) => Err(e.into()),
    }
}
