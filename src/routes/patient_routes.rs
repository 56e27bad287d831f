// src/routes/patient_routes.rs

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    db::{ViolationKind, violated_constraint},
    error::ApiError,
    extract::{ApiJson, ApiPath, ApiQuery, double_option},
    middleware::auth_context::AuthContext,
    models::{AppState, Role},
};

const PATIENT_EDITORS: &[Role] = &[Role::Admin, Role::Receptionist, Role::Doctor];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PatientRow {
    pub id: i64,
    pub name: String,
    pub contact: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub medical_history: Option<String>,
    pub city: Option<String>,
    pub created_at: NaiveDateTime,
    pub doctor_id: Option<i64>,
    pub doctor_name: Option<String>,
    pub company_id: Option<i64>,
    pub company_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PatientOut {
    #[serde(flatten)]
    pub patient: PatientRow,
    pub age: Option<i32>,
}

impl PatientOut {
    fn from_row(patient: PatientRow, today: NaiveDate) -> Self {
        let age = patient.date_of_birth.map(|dob| age_on(dob, today));
        Self { patient, age }
    }
}

/// Whole years between `dob` and `today`.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let had_birthday = (today.month(), today.day()) >= (dob.month(), dob.day());
    today.year() - dob.year() - if had_birthday { 0 } else { 1 }
}

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    pub name: String,
    pub contact: Option<String>,
    pub doctor_id: Option<i64>,
    pub date_of_birth: Option<NaiveDate>,
    pub medical_history: Option<String>,
    pub city: Option<String>,
    pub company_id: Option<i64>,
}

/// Partial update. Nullable columns use `Option<Option<T>>` so an explicit
/// `null` clears them while an absent field leaves them alone.
#[derive(Debug, Default, Deserialize)]
pub struct PatientPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub contact: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub doctor_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub date_of_birth: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub medical_history: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub city: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub company_id: Option<Option<i64>>,
}

/// Column values written by create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientFields {
    pub name: String,
    pub contact: Option<String>,
    pub doctor_id: Option<i64>,
    pub date_of_birth: Option<NaiveDate>,
    pub medical_history: Option<String>,
    pub city: Option<String>,
    pub company_id: Option<i64>,
}

fn blank_to_none(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl PatientFields {
    fn validate(self, today: NaiveDate) -> Result<Self, ApiError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::Validation("name is required".into()));
        }
        if self.date_of_birth.is_some_and(|dob| dob > today) {
            return Err(ApiError::Validation(
                "Date of birth cannot be in the future".into(),
            ));
        }
        Ok(Self {
            name,
            contact: blank_to_none(self.contact),
            medical_history: blank_to_none(self.medical_history),
            city: blank_to_none(self.city),
            ..self
        })
    }
}

impl From<CreatePatientRequest> for PatientFields {
    fn from(req: CreatePatientRequest) -> Self {
        Self {
            name: req.name,
            contact: req.contact,
            doctor_id: req.doctor_id,
            date_of_birth: req.date_of_birth,
            medical_history: req.medical_history,
            city: req.city,
            company_id: req.company_id,
        }
    }
}

impl PatientPatch {
    /// Merge onto the stored row, field by field.
    pub fn apply(self, existing: &PatientRow) -> PatientFields {
        PatientFields {
            name: self.name.unwrap_or_else(|| existing.name.clone()),
            contact: self.contact.unwrap_or_else(|| existing.contact.clone()),
            doctor_id: self.doctor_id.unwrap_or(existing.doctor_id),
            date_of_birth: self.date_of_birth.unwrap_or(existing.date_of_birth),
            medical_history: self
                .medical_history
                .unwrap_or_else(|| existing.medical_history.clone()),
            city: self.city.unwrap_or_else(|| existing.city.clone()),
            company_id: self.company_id.unwrap_or(existing.company_id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PatientListQuery {
    pub month: Option<i32>,
    pub year: Option<i32>,
}

impl PatientListQuery {
    fn validate(&self) -> Result<(), ApiError> {
        if self.month.is_some_and(|m| !(1..=12).contains(&m)) {
            return Err(ApiError::Validation("month must be between 1 and 12".into()));
        }
        if self.year.is_some_and(|y| !(1900..=2100).contains(&y)) {
            return Err(ApiError::Validation("year must be between 1900 and 2100".into()));
        }
        Ok(())
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", post(create_patient).get(list_patients))
        .route("/patients/{patient_id}", get(get_patient).put(update_patient))
}

const SELECT_PATIENT: &str = r#"
    SELECT
      p.id,
      p.name,
      p.contact,
      p.date_of_birth,
      p.medical_history,
      p.city,
      p.created_at,
      p.doctor_id,
      d.name AS doctor_name,
      p.company_id,
      c.name AS company_name
    FROM patients p
    LEFT JOIN doctors d ON d.id = p.doctor_id
    LEFT JOIN companies c ON c.id = p.company_id
"#;

pub async fn fetch_patient(db: &sqlx::PgPool, patient_id: i64) -> Result<Option<PatientRow>, ApiError> {
    sqlx::query_as::<_, PatientRow>(&format!("{SELECT_PATIENT} WHERE p.id = $1"))
        .bind(patient_id)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)
}

fn reference_error(e: sqlx::Error) -> ApiError {
    match violated_constraint(&e) {
        Some((ViolationKind::ForeignKey, "patients_doctor_id_fkey")) => ApiError::not_found("Doctor"),
        Some((ViolationKind::ForeignKey, "patients_company_id_fkey")) => {
            ApiError::not_found("Company")
        }
        _ => ApiError::db(e),
    }
}

pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(req): ApiJson<CreatePatientRequest>,
) -> Result<(StatusCode, Json<PatientOut>), ApiError> {
    auth.require(PATIENT_EDITORS)?;

    let today = Local::now().date_naive();
    let fields = PatientFields::from(req).validate(today)?;

    let patient_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO patients (name, contact, doctor_id, date_of_birth, medical_history, city, company_id)
        VALUES ($1,$2,$3,$4,$5,$6,$7)
        RETURNING id
        "#,
    )
    .bind(&fields.name)
    .bind(fields.contact.as_deref())
    .bind(fields.doctor_id)
    .bind(fields.date_of_birth)
    .bind(fields.medical_history.as_deref())
    .bind(fields.city.as_deref())
    .bind(fields.company_id)
    .fetch_one(&state.db)
    .await
    .map_err(reference_error)?;

    let row = fetch_patient(&state.db, patient_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient"))?;

    Ok((StatusCode::CREATED, Json(PatientOut::from_row(row, today))))
}

pub async fn list_patients(
    State(state): State<AppState>,
    _auth: AuthContext,
    ApiQuery(q): ApiQuery<PatientListQuery>,
) -> Result<Json<Vec<PatientOut>>, ApiError> {
    q.validate()?;

    let rows: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&format!(
        r#"{SELECT_PATIENT}
        WHERE ($1::INT IS NULL OR EXTRACT(MONTH FROM p.created_at) = $1)
          AND ($2::INT IS NULL OR EXTRACT(YEAR FROM p.created_at) = $2)
        ORDER BY p.id ASC"#
    ))
    .bind(q.month)
    .bind(q.year)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let today = Local::now().date_naive();
    Ok(Json(
        rows.into_iter()
            .map(|row| PatientOut::from_row(row, today))
            .collect(),
    ))
}

pub async fn get_patient(
    State(state): State<AppState>,
    _auth: AuthContext,
    ApiPath(patient_id): ApiPath<i64>,
) -> Result<Json<PatientOut>, ApiError> {
    let row = fetch_patient(&state.db, patient_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient"))?;

    Ok(Json(PatientOut::from_row(row, Local::now().date_naive())))
}

pub async fn update_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(patient_id): ApiPath<i64>,
    ApiJson(patch): ApiJson<PatientPatch>,
) -> Result<Json<PatientOut>, ApiError> {
    auth.require(PATIENT_EDITORS)?;

    let existing = fetch_patient(&state.db, patient_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient"))?;

    let today = Local::now().date_naive();
    let fields = patch.apply(&existing).validate(today)?;

    let updated = sqlx::query(
        r#"
        UPDATE patients
        SET name = $2,
            contact = $3,
            doctor_id = $4,
            date_of_birth = $5,
            medical_history = $6,
            city = $7,
            company_id = $8
        WHERE id = $1
        "#,
    )
    .bind(patient_id)
    .bind(&fields.name)
    .bind(fields.contact.as_deref())
    .bind(fields.doctor_id)
    .bind(fields.date_of_birth)
    .bind(fields.medical_history.as_deref())
    .bind(fields.city.as_deref())
    .bind(fields.company_id)
    .execute(&state.db)
    .await
    .map_err(reference_error)?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("Patient"));
    }

    let row = fetch_patient(&state.db, patient_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient"))?;

    Ok(Json(PatientOut::from_row(row, today)))
}
