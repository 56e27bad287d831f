// src/routes/dashboard_routes.rs

use axum::{Json, Router, extract::State, routing::get};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::{
    appointment_store::{self, AppointmentOut},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, Role},
    routes::appointment_routes::day_bounds,
};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Dashboard {
    Doctor {
        role: Role,
        my_patients_count: i64,
        my_todays_appointments: Vec<AppointmentOut>,
    },
    Staff {
        role: Role,
        total_patients_this_month: i64,
        todays_appointments_count: usize,
        todays_appointments: Vec<AppointmentOut>,
    },
}

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}

pub fn first_of_month(day: NaiveDate) -> NaiveDateTime {
    day.with_day(1)
        .unwrap_or(day)
        .and_time(chrono::NaiveTime::MIN)
}

/// Doctor profile linked to a login, if any.
async fn doctor_profile_of(state: &AppState, user_id: i64) -> Result<Option<i64>, ApiError> {
    sqlx::query_scalar(r#"SELECT id FROM doctors WHERE user_id = $1"#)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)
}

pub async fn dashboard(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Dashboard>, ApiError> {
    let today = Local::now().date_naive();
    let (start, end) = day_bounds(today);

    if auth.role == Role::Doctor {
        let Some(doctor_id) = doctor_profile_of(&state, auth.user_id).await? else {
            // signed in as a doctor but no doctor record points at this login
            return Ok(Json(Dashboard::Doctor {
                role: auth.role,
                my_patients_count: 0,
                my_todays_appointments: vec![],
            }));
        };

        let my_patients_count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM patients WHERE doctor_id = $1"#)
                .bind(doctor_id)
                .fetch_one(&state.db)
                .await
                .map_err(ApiError::db)?;

        let my_todays_appointments =
            appointment_store::list_between(&state.db, start, end, Some(doctor_id))
                .await
                .map_err(ApiError::db)?;

        return Ok(Json(Dashboard::Doctor {
            role: auth.role,
            my_patients_count,
            my_todays_appointments,
        }));
    }

    let total_patients_this_month: i64 =
        sqlx::query_scalar(r#"SELECT COUNT(*) FROM patients WHERE created_at >= $1"#)
            .bind(first_of_month(today))
            .fetch_one(&state.db)
            .await
            .map_err(ApiError::db)?;

    let todays_appointments = appointment_store::list_between(&state.db, start, end, None)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(Dashboard::Staff {
        role: auth.role,
        total_patients_this_month,
        todays_appointments_count: todays_appointments.len(),
        todays_appointments,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_starts_at_midnight_on_the_first() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(first_of_month(day).to_string(), "2024-02-01 00:00:00");
    }

    #[test]
    fn staff_dashboard_serialises_flat() {
        let body = serde_json::to_value(Dashboard::Staff {
            role: Role::Receptionist,
            total_patients_this_month: 4,
            todays_appointments_count: 0,
            todays_appointments: vec![],
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "role": "receptionist",
                "total_patients_this_month": 4,
                "todays_appointments_count": 0,
                "todays_appointments": []
            })
        );
    }

    #[test]
    fn doctor_dashboard_uses_own_keys() {
        let body = serde_json::to_value(Dashboard::Doctor {
            role: Role::Doctor,
            my_patients_count: 2,
            my_todays_appointments: vec![],
        })
        .unwrap();
        assert_eq!(body["role"], "doctor");
        assert_eq!(body["my_patients_count"], 2);
        assert!(body.get("todays_appointments").is_none());
    }
}
