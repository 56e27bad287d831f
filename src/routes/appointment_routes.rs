// src/routes/appointment_routes.rs

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    appointment_store::{self, AppointmentOut, PgSlotStore},
    error::ApiError,
    extract::{ApiJson, ApiPath, double_option, flexible_datetime, flexible_datetime_opt},
    middleware::auth_context::AuthContext,
    models::{AppState, Role},
    routes::patient_routes::fetch_patient,
    slot_guard::{AppointmentDraft, Slot, reserve_slot},
};

/*
Who may do what:
  create        admin, receptionist
  put / patch   admin, receptionist, doctor
  read          any signed-in user
*/
const BOOKERS: &[Role] = &[Role::Admin, Role::Receptionist];
const EDITORS: &[Role] = &[Role::Admin, Role::Receptionist, Role::Doctor];

const DEFAULT_STATUS: &str = "scheduled";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/today", get(todays_appointments))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment)
                .put(replace_appointment)
                .patch(patch_appointment),
        )
}

/* ============================================================
   Request bodies
   ============================================================ */

/// Body of POST and PUT.
#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentRequest {
    pub doctor_id: i64,
    #[serde(deserialize_with = "flexible_datetime")]
    pub appointment_datetime: NaiveDateTime,
    pub patient_id: Option<i64>,
    pub patient_name: Option<String>,
    pub patient_contact: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub company_id: Option<i64>,
}

/// Body of PATCH: only present fields change, `null` clears nullable ones.
#[derive(Debug, Default, Deserialize)]
pub struct AppointmentPatch {
    pub doctor_id: Option<i64>,
    #[serde(default, deserialize_with = "flexible_datetime_opt")]
    pub appointment_datetime: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "double_option")]
    pub patient_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub patient_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub patient_contact: Option<Option<String>>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub company_id: Option<Option<i64>>,
}

#[derive(Debug, Serialize)]
pub struct TodaysAppointments {
    pub todays_appointments: Vec<AppointmentOut>,
}

fn trimmed(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl AppointmentRequest {
    /// Shape checks that need no database. Patient existence is checked by the caller.
    pub fn into_draft(self) -> Result<AppointmentDraft, ApiError> {
        let patient_name = trimmed(self.patient_name);
        if self.patient_id.is_none() && patient_name.is_none() {
            return Err(ApiError::Validation(
                "Provide patient_id or patient_name".into(),
            ));
        }
        let status = trimmed(self.status).unwrap_or_else(|| DEFAULT_STATUS.to_string());

        Ok(AppointmentDraft {
            slot: Slot::new(self.doctor_id, self.appointment_datetime),
            patient_id: self.patient_id,
            patient_name,
            patient_contact: trimmed(self.patient_contact),
            status,
            notes: self.notes,
            company_id: self.company_id,
        })
    }
}

impl From<AppointmentOut> for AppointmentRequest {
    fn from(a: AppointmentOut) -> Self {
        Self {
            doctor_id: a.doctor_id,
            appointment_datetime: a.appointment_datetime,
            patient_id: a.patient_id,
            patient_name: a.patient_name,
            patient_contact: a.patient_contact,
            status: Some(a.status),
            notes: a.notes,
            company_id: a.company_id,
        }
    }
}

impl AppointmentPatch {
    /// Merge onto the stored appointment, field by field.
    pub fn apply(self, existing: AppointmentOut) -> AppointmentRequest {
        let base = AppointmentRequest::from(existing);
        // a new patient id drops the old snapshot so it is re-read from the patient
        let repointed = matches!(self.patient_id, Some(Some(id)) if Some(id) != base.patient_id);
        let keep = |given: Option<Option<String>>, old: Option<String>| match given {
            Some(v) => v,
            None if repointed => None,
            None => old,
        };
        AppointmentRequest {
            doctor_id: self.doctor_id.unwrap_or(base.doctor_id),
            appointment_datetime: self
                .appointment_datetime
                .unwrap_or(base.appointment_datetime),
            patient_id: self.patient_id.unwrap_or(base.patient_id),
            patient_name: keep(self.patient_name, base.patient_name),
            patient_contact: keep(self.patient_contact, base.patient_contact),
            status: self.status.or(base.status),
            notes: self.notes.unwrap_or(base.notes),
            company_id: self.company_id.unwrap_or(base.company_id),
        }
    }
}

/* ============================================================
   Shared write path
   ============================================================ */

/// Fill the patient snapshot from the patient record when the caller gave
/// only an id. Unknown ids are a 404.
async fn resolve_patient(state: &AppState, draft: &mut AppointmentDraft) -> Result<(), ApiError> {
    let Some(patient_id) = draft.patient_id else {
        return Ok(());
    };

    let patient = fetch_patient(&state.db, patient_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient"))?;

    if draft.patient_name.is_none() {
        draft.patient_name = Some(patient.name);
    }
    if draft.patient_contact.is_none() {
        draft.patient_contact = patient.contact;
    }
    Ok(())
}

/// Run the conflict guard in its own transaction and return the stored record.
async fn write_appointment(
    state: &AppState,
    draft: AppointmentDraft,
    existing: Option<i64>,
) -> Result<AppointmentOut, ApiError> {
    let mut store = PgSlotStore::begin(&state.db).await.map_err(ApiError::db)?;

    // on any error the store is dropped here and the transaction rolls back
    let appointment_id = reserve_slot(&mut store, &draft, existing).await?;
    store.commit().await.map_err(ApiError::db)?;

    appointment_store::fetch_appointment(&state.db, appointment_id)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Appointment"))
}

async fn load(state: &AppState, appointment_id: i64) -> Result<AppointmentOut, ApiError> {
    appointment_store::fetch_appointment(&state.db, appointment_id)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Appointment"))
}

/* ============================================================
   Handlers
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(req): ApiJson<AppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentOut>), ApiError> {
    auth.require(BOOKERS)?;

    let mut draft = req.into_draft()?;
    resolve_patient(&state, &mut draft).await?;

    let created = write_appointment(&state, draft, None).await?;
    tracing::info!(
        appointment_id = created.id,
        doctor_id = created.doctor_id,
        at = %created.appointment_datetime,
        "appointment booked"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn replace_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(appointment_id): ApiPath<i64>,
    ApiJson(req): ApiJson<AppointmentRequest>,
) -> Result<Json<AppointmentOut>, ApiError> {
    auth.require(EDITORS)?;

    // 404 before validating against someone else's slot
    load(&state, appointment_id).await?;

    let mut draft = req.into_draft()?;
    resolve_patient(&state, &mut draft).await?;

    Ok(Json(write_appointment(&state, draft, Some(appointment_id)).await?))
}

pub async fn patch_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(appointment_id): ApiPath<i64>,
    ApiJson(patch): ApiJson<AppointmentPatch>,
) -> Result<Json<AppointmentOut>, ApiError> {
    auth.require(EDITORS)?;

    let existing = load(&state, appointment_id).await?;
    let patient_changed = patch.patient_id.is_some();

    let mut draft = patch.apply(existing).into_draft()?;
    if patient_changed {
        resolve_patient(&state, &mut draft).await?;
    }

    Ok(Json(write_appointment(&state, draft, Some(appointment_id)).await?))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    _auth: AuthContext,
    ApiPath(appointment_id): ApiPath<i64>,
) -> Result<Json<AppointmentOut>, ApiError> {
    Ok(Json(load(&state, appointment_id).await?))
}

pub async fn list_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<Vec<AppointmentOut>>, ApiError> {
    let rows = appointment_store::list_appointments(&state.db)
        .await
        .map_err(ApiError::db)?;
    Ok(Json(rows))
}

/// `[day 00:00, next day 00:00)`
pub fn day_bounds(day: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = day.and_time(chrono::NaiveTime::MIN);
    (start, start + chrono::Duration::days(1))
}

pub async fn todays_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<TodaysAppointments>, ApiError> {
    let (start, end) = day_bounds(Local::now().date_naive());
    let rows = appointment_store::list_between(&state.db, start, end, None)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(TodaysAppointments {
        todays_appointments: rows,
    }))
}
