// src/routes/invoice_routes.rs

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    db::{ViolationKind, violated_constraint},
    error::ApiError,
    extract::{ApiJson, ApiPath, double_option},
    middleware::auth_context::AuthContext,
    models::{AppState, Role},
};

const BILLERS: &[Role] = &[Role::Admin, Role::Receptionist];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invoices", post(create_invoice).get(list_invoices))
        .route("/invoices/{invoice_id}", get(get_invoice).patch(update_invoice))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Clone, Deserialize)]
pub struct TreatmentIn {
    pub description: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub total: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub invoice_no: String,
    pub patient_id: i64,
    pub doctor_id: Option<i64>,
    pub patient_name: String,
    pub patient_age: i32,
    pub patient_contact: String,
    pub doctor_name: Option<String>,
    pub date: String,
    pub diagnosis: Option<String>,
    pub treatments: Vec<TreatmentIn>,
    pub subtotal: f64,
    #[serde(default)]
    pub discount: f64,
    pub total: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateInvoiceRequest {
    #[serde(default, deserialize_with = "double_option")]
    pub diagnosis: Option<Option<String>>,
    pub subtotal: Option<f64>,
    pub discount: Option<f64>,
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TreatmentOut {
    pub id: i64,
    pub invoice_id: i64,
    pub description: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub total: f64,
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: i64,
    invoice_no: String,
    patient_id: i64,
    doctor_id: Option<i64>,
    patient_name: String,
    patient_age: i32,
    patient_contact: String,
    doctor_name: Option<String>,
    date: String,
    diagnosis: Option<String>,
    subtotal: f64,
    discount: f64,
    total: f64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct InvoiceOut {
    pub id: i64,
    pub invoice_no: String,
    pub patient_id: i64,
    pub doctor_id: Option<i64>,
    pub patient_name: String,
    pub patient_age: i32,
    pub patient_contact: String,
    pub doctor_name: Option<String>,
    pub date: String,
    pub diagnosis: Option<String>,
    pub subtotal: f64,
    pub discount: f64,
    pub total: f64,
    pub treatments: Vec<TreatmentOut>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl InvoiceOut {
    fn assemble(r: InvoiceRow, treatments: Vec<TreatmentOut>) -> Self {
        Self {
            id: r.id,
            invoice_no: r.invoice_no,
            patient_id: r.patient_id,
            doctor_id: r.doctor_id,
            patient_name: r.patient_name,
            patient_age: r.patient_age,
            patient_contact: r.patient_contact,
            doctor_name: r.doctor_name,
            date: r.date,
            diagnosis: r.diagnosis,
            subtotal: r.subtotal,
            discount: r.discount,
            total: r.total,
            treatments,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/* ============================================================
   Validation
   ============================================================ */

fn money(label: &str, v: f64) -> Result<(), ApiError> {
    if !v.is_finite() || v < 0.0 {
        return Err(ApiError::Validation(format!("{label} must be a non-negative amount")));
    }
    Ok(())
}

impl CreateInvoiceRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.invoice_no.trim().is_empty() {
            return Err(ApiError::Validation("invoice_no is required".into()));
        }
        if self.patient_name.trim().is_empty() {
            return Err(ApiError::Validation("patient_name is required".into()));
        }
        if self.patient_age < 0 {
            return Err(ApiError::Validation("patient_age must be >= 0".into()));
        }
        if self.treatments.is_empty() {
            return Err(ApiError::Validation("at least one treatment is required".into()));
        }
        for t in &self.treatments {
            if t.description.trim().is_empty() {
                return Err(ApiError::Validation("treatment description is required".into()));
            }
            if t.quantity <= 0 {
                return Err(ApiError::Validation("quantity must be > 0".into()));
            }
            money("unit_price", t.unit_price)?;
            money("treatment total", t.total)?;
        }
        money("subtotal", self.subtotal)?;
        money("discount", self.discount)?;
        money("total", self.total)?;
        Ok(())
    }
}

impl UpdateInvoiceRequest {
    fn validate(&self) -> Result<(), ApiError> {
        for (label, v) in [
            ("subtotal", self.subtotal),
            ("discount", self.discount),
            ("total", self.total),
        ] {
            if let Some(v) = v {
                money(label, v)?;
            }
        }
        Ok(())
    }
}

/* ============================================================
   Queries
   ============================================================ */

const SELECT_INVOICE: &str = r#"
    SELECT id, invoice_no, patient_id, doctor_id, patient_name, patient_age,
           patient_contact, doctor_name, date, diagnosis, subtotal, discount,
           total, created_at, updated_at
    FROM invoices
"#;

/// Treatments for many invoices in one round trip, grouped by invoice id.
async fn treatments_for(
    state: &AppState,
    invoice_ids: &[i64],
) -> Result<BTreeMap<i64, Vec<TreatmentOut>>, ApiError> {
    let rows: Vec<TreatmentOut> = sqlx::query_as::<_, TreatmentOut>(
        r#"
        SELECT id, invoice_id, description, quantity, unit_price, total
        FROM invoice_treatments
        WHERE invoice_id = ANY($1)
        ORDER BY id ASC
        "#,
    )
    .bind(invoice_ids)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let mut grouped: BTreeMap<i64, Vec<TreatmentOut>> = BTreeMap::new();
    for t in rows {
        grouped.entry(t.invoice_id).or_default().push(t);
    }
    Ok(grouped)
}

async fn load_invoice(state: &AppState, invoice_id: i64) -> Result<InvoiceOut, ApiError> {
    let row = sqlx::query_as::<_, InvoiceRow>(&format!("{SELECT_INVOICE} WHERE id = $1"))
        .bind(invoice_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Invoice"))?;

    let mut treatments = treatments_for(state, &[row.id]).await?;
    let lines = treatments.remove(&row.id).unwrap_or_default();
    Ok(InvoiceOut::assemble(row, lines))
}

fn invoice_write_error(e: sqlx::Error) -> ApiError {
    match violated_constraint(&e) {
        Some((ViolationKind::Unique, "invoices_invoice_no_key")) => {
            ApiError::Conflict("Invoice number already exists".into())
        }
        Some((ViolationKind::ForeignKey, "invoices_patient_id_fkey")) => {
            ApiError::not_found("Patient")
        }
        Some((ViolationKind::ForeignKey, "invoices_doctor_id_fkey")) => {
            ApiError::not_found("Doctor")
        }
        _ => ApiError::db(e),
    }
}

/* ============================================================
   Handlers
   ============================================================ */

pub async fn create_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiJson(req): ApiJson<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceOut>), ApiError> {
    auth.require(BILLERS)?;
    req.validate()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let invoice_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO invoices (
          invoice_no, patient_id, doctor_id, patient_name, patient_age,
          patient_contact, doctor_name, date, diagnosis, subtotal, discount, total
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
        RETURNING id
        "#,
    )
    .bind(req.invoice_no.trim())
    .bind(req.patient_id)
    .bind(req.doctor_id)
    .bind(req.patient_name.trim())
    .bind(req.patient_age)
    .bind(req.patient_contact.trim())
    .bind(req.doctor_name.as_deref())
    .bind(&req.date)
    .bind(req.diagnosis.as_deref())
    .bind(req.subtotal)
    .bind(req.discount)
    .bind(req.total)
    .fetch_one(&mut *tx)
    .await
    .map_err(invoice_write_error)?;

    for t in &req.treatments {
        sqlx::query(
            r#"
            INSERT INTO invoice_treatments (invoice_id, description, quantity, unit_price, total)
            VALUES ($1,$2,$3,$4,$5)
            "#,
        )
        .bind(invoice_id)
        .bind(t.description.trim())
        .bind(t.quantity)
        .bind(t.unit_price)
        .bind(t.total)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(invoice_id, invoice_no = %req.invoice_no.trim(), "invoice created");
    Ok((StatusCode::CREATED, Json(load_invoice(&state, invoice_id).await?)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<Vec<InvoiceOut>>, ApiError> {
    let rows: Vec<InvoiceRow> =
        sqlx::query_as::<_, InvoiceRow>(&format!("{SELECT_INVOICE} ORDER BY created_at DESC, id DESC"))
            .fetch_all(&state.db)
            .await
            .map_err(ApiError::db)?;

    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut treatments = treatments_for(&state, &ids).await?;

    Ok(Json(
        rows.into_iter()
            .map(|r| {
                let lines = treatments.remove(&r.id).unwrap_or_default();
                InvoiceOut::assemble(r, lines)
            })
            .collect(),
    ))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    _auth: AuthContext,
    ApiPath(invoice_id): ApiPath<i64>,
) -> Result<Json<InvoiceOut>, ApiError> {
    Ok(Json(load_invoice(&state, invoice_id).await?))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    ApiPath(invoice_id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateInvoiceRequest>,
) -> Result<Json<InvoiceOut>, ApiError> {
    auth.require(BILLERS)?;
    req.validate()?;

    let current = load_invoice(&state, invoice_id).await?;
    let diagnosis = req.diagnosis.unwrap_or(current.diagnosis);

    sqlx::query(
        r#"
        UPDATE invoices
        SET diagnosis = $2,
            subtotal = $3,
            discount = $4,
            total = $5,
            updated_at = LOCALTIMESTAMP
        WHERE id = $1
        "#,
    )
    .bind(invoice_id)
    .bind(diagnosis.as_deref())
    .bind(req.subtotal.unwrap_or(current.subtotal))
    .bind(req.discount.unwrap_or(current.discount))
    .bind(req.total.unwrap_or(current.total))
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(load_invoice(&state, invoice_id).await?))
}
