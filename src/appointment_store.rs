// src/appointment_store.rs

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    db::{ViolationKind, violated_constraint},
    slot_guard::{AppointmentDraft, Slot, SlotStore, StoreError},
};

const SLOT_CONSTRAINT: &str = "appointments_doctor_slot_key";

/// Appointment as returned by the API, with display names joined in.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentOut {
    pub id: i64,
    pub patient_id: Option<i64>,
    pub doctor_id: i64,
    pub appointment_datetime: NaiveDateTime,
    pub status: String,
    pub notes: Option<String>,
    pub patient_name: Option<String>,
    pub patient_contact: Option<String>,
    pub doctor_name: Option<String>,
    pub company_id: Option<i64>,
    pub company_name: Option<String>,
}

const SELECT_APPOINTMENT: &str = r#"
    SELECT
      a.id,
      a.patient_id,
      a.doctor_id,
      a.appointment_datetime,
      a.status,
      a.notes,
      a.patient_name,
      a.patient_contact,
      d.name AS doctor_name,
      a.company_id,
      c.name AS company_name
    FROM appointments a
    LEFT JOIN doctors d ON d.id = a.doctor_id
    LEFT JOIN companies c ON c.id = a.company_id
"#;

pub async fn fetch_appointment(db: &PgPool, id: i64) -> Result<Option<AppointmentOut>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentOut>(&format!("{SELECT_APPOINTMENT} WHERE a.id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn list_appointments(db: &PgPool) -> Result<Vec<AppointmentOut>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentOut>(&format!(
        "{SELECT_APPOINTMENT} ORDER BY a.appointment_datetime ASC, a.id ASC"
    ))
    .fetch_all(db)
    .await
}

/// Appointments in `[start, end)`, optionally for one doctor.
pub async fn list_between(
    db: &PgPool,
    start: NaiveDateTime,
    end: NaiveDateTime,
    doctor_id: Option<i64>,
) -> Result<Vec<AppointmentOut>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentOut>(&format!(
        r#"{SELECT_APPOINTMENT}
        WHERE a.appointment_datetime >= $1
          AND a.appointment_datetime <  $2
          AND ($3::BIGINT IS NULL OR a.doctor_id = $3)
        ORDER BY a.appointment_datetime ASC, a.id ASC"#
    ))
    .bind(start)
    .bind(end)
    .bind(doctor_id)
    .fetch_all(db)
    .await
}

/// [`SlotStore`] over one postgres transaction. Dropping it without
/// [`PgSlotStore::commit`] rolls the transaction back.
pub struct PgSlotStore {
    tx: Transaction<'static, Postgres>,
}

impl PgSlotStore {
    pub async fn begin(db: &PgPool) -> Result<Self, sqlx::Error> {
        Ok(Self { tx: db.begin().await? })
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }
}

fn classify(e: sqlx::Error) -> StoreError {
    match violated_constraint(&e) {
        Some((ViolationKind::Unique, SLOT_CONSTRAINT)) => StoreError::SlotTaken,
        Some((ViolationKind::ForeignKey, "appointments_doctor_id_fkey")) => {
            StoreError::MissingReference("Doctor")
        }
        Some((ViolationKind::ForeignKey, "appointments_patient_id_fkey")) => {
            StoreError::MissingReference("Patient")
        }
        Some((ViolationKind::ForeignKey, "appointments_company_id_fkey")) => {
            StoreError::MissingReference("Company")
        }
        _ => StoreError::Db(e),
    }
}

#[async_trait]
impl SlotStore for PgSlotStore {
    async fn find_clash(
        &mut self,
        slot: Slot,
        exclude: Option<i64>,
    ) -> Result<Option<i64>, StoreError> {
        let holder: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM appointments
            WHERE doctor_id = $1
              AND appointment_datetime = $2
              AND ($3::BIGINT IS NULL OR id <> $3)
            LIMIT 1
            "#,
        )
        .bind(slot.doctor_id)
        .bind(slot.at)
        .bind(exclude)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(holder)
    }

    async fn insert(&mut self, draft: &AppointmentDraft) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            r#"
            INSERT INTO appointments (
              doctor_id,
              appointment_datetime,
              patient_id,
              patient_name,
              patient_contact,
              status,
              notes,
              company_id
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            RETURNING id
            "#,
        )
        .bind(draft.slot.doctor_id)
        .bind(draft.slot.at)
        .bind(draft.patient_id)
        .bind(draft.patient_name.as_deref())
        .bind(draft.patient_contact.as_deref())
        .bind(&draft.status)
        .bind(draft.notes.as_deref())
        .bind(draft.company_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)
    }

    async fn update(&mut self, id: i64, draft: &AppointmentDraft) -> Result<bool, StoreError> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE appointments
            SET
              doctor_id = $2,
              appointment_datetime = $3,
              patient_id = $4,
              patient_name = $5,
              patient_contact = $6,
              status = $7,
              notes = $8,
              company_id = $9
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(draft.slot.doctor_id)
        .bind(draft.slot.at)
        .bind(draft.patient_id)
        .bind(draft.patient_name.as_deref())
        .bind(draft.patient_contact.as_deref())
        .bind(&draft.status)
        .bind(draft.notes.as_deref())
        .bind(draft.company_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(updated.is_some())
    }
}

/// These run against a real database and skip when `DATABASE_URL` is unset.
/// Each test books under a doctor of its own, so they can share one database.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ApiError,
        slot_guard::{GuardError, reserve_slot},
    };
    use axum::http::StatusCode;
    use chrono::NaiveDate;

    async fn test_pool() -> Option<PgPool> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping postgres test");
            return None;
        };
        Some(crate::db::connect_pg(&url, 5).await.unwrap())
    }

    async fn new_doctor(db: &PgPool, name: &str) -> i64 {
        sqlx::query_scalar(
            r#"
            INSERT INTO doctors (name, qualifications, pmdc_no, cnic)
            VALUES ($1, 'MBBS', 'PMDC-0', '00000-0000000-0')
            RETURNING id
            "#,
        )
        .bind(name)
        .fetch_one(db)
        .await
        .unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2031, 5, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn draft(doctor_id: i64, when: NaiveDateTime, patient: &str) -> AppointmentDraft {
        AppointmentDraft {
            slot: Slot::new(doctor_id, when),
            patient_id: None,
            patient_name: Some(patient.to_string()),
            patient_contact: None,
            status: "scheduled".into(),
            notes: None,
            company_id: None,
        }
    }

    async fn count_for(db: &PgPool, doctor_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM appointments WHERE doctor_id = $1")
            .bind(doctor_id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    async fn book(db: &PgPool, d: &AppointmentDraft) -> i64 {
        let mut store = PgSlotStore::begin(db).await.unwrap();
        let id = store.insert(d).await.unwrap();
        store.commit().await.unwrap();
        id
    }

    #[tokio::test]
    async fn find_clash_sees_holder_and_ignores_itself() {
        let Some(db) = test_pool().await else { return };
        let doctor = new_doctor(&db, "Dr Clash").await;
        let held = book(&db, &draft(doctor, at(9, 0), "Ayesha")).await;

        let mut store = PgSlotStore::begin(&db).await.unwrap();
        let slot = Slot::new(doctor, at(9, 0));
        assert_eq!(store.find_clash(slot, None).await.unwrap(), Some(held));
        assert_eq!(store.find_clash(slot, Some(held)).await.unwrap(), None);
        assert_eq!(
            store.find_clash(Slot::new(doctor, at(9, 1)), None).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn blind_second_insert_is_classified_as_slot_taken() {
        let Some(db) = test_pool().await else { return };
        let doctor = new_doctor(&db, "Dr Unique").await;
        book(&db, &draft(doctor, at(10, 0), "Ayesha")).await;

        // straight to insert, no pre-check
        let mut store = PgSlotStore::begin(&db).await.unwrap();
        let err = store
            .insert(&draft(doctor, at(10, 0), "Bilal"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SlotTaken), "{err:?}");
        drop(store);

        assert_eq!(count_for(&db, doctor).await, 1);
    }

    #[tokio::test]
    async fn concurrent_bookings_leave_one_row_and_loser_gets_409() {
        let Some(db) = test_pool().await else { return };
        let doctor = new_doctor(&db, "Dr Race").await;
        let slot_at = at(11, 0);

        let mut first = PgSlotStore::begin(&db).await.unwrap();
        let mut second = PgSlotStore::begin(&db).await.unwrap();
        let slot = Slot::new(doctor, slot_at);
        assert_eq!(first.find_clash(slot, None).await.unwrap(), None);
        assert_eq!(second.find_clash(slot, None).await.unwrap(), None);

        first.insert(&draft(doctor, slot_at, "Ayesha")).await.unwrap();
        // blocks on the unique index until the first transaction ends
        let pending = tokio::spawn(async move {
            let outcome = second.insert(&draft(doctor, slot_at, "Bilal")).await;
            drop(second);
            outcome
        });
        first.commit().await.unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::SlotTaken), "{err:?}");
        assert_eq!(
            ApiError::from(GuardError::from(err)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(count_for(&db, doctor).await, 1);
    }

    #[tokio::test]
    async fn guard_over_postgres_rejects_same_slot_and_allows_next_minute() {
        let Some(db) = test_pool().await else { return };
        let doctor = new_doctor(&db, "Dr Guard").await;
        book(&db, &draft(doctor, at(12, 0), "Ayesha")).await;

        let mut store = PgSlotStore::begin(&db).await.unwrap();
        let err = reserve_slot(&mut store, &draft(doctor, at(12, 0), "Bilal"), None)
            .await
            .unwrap_err();
        assert_eq!(err, GuardError::SlotConflict);
        drop(store);

        let mut store = PgSlotStore::begin(&db).await.unwrap();
        reserve_slot(&mut store, &draft(doctor, at(12, 1), "Bilal"), None)
            .await
            .unwrap();
        store.commit().await.unwrap();
        assert_eq!(count_for(&db, doctor).await, 2);
    }

    #[tokio::test]
    async fn moving_onto_taken_slot_keeps_stored_row() {
        let Some(db) = test_pool().await else { return };
        let doctor = new_doctor(&db, "Dr Move").await;
        book(&db, &draft(doctor, at(13, 0), "Ayesha")).await;
        let b = book(&db, &draft(doctor, at(14, 0), "Bilal")).await;

        let mut store = PgSlotStore::begin(&db).await.unwrap();
        let err = reserve_slot(&mut store, &draft(doctor, at(13, 0), "Bilal"), Some(b))
            .await
            .unwrap_err();
        assert_eq!(err, GuardError::SlotConflict);
        drop(store);

        let stored = fetch_appointment(&db, b).await.unwrap().unwrap();
        assert_eq!(stored.appointment_datetime, at(14, 0));

        // re-saving on its own slot is not a clash
        let mut store = PgSlotStore::begin(&db).await.unwrap();
        let mut resaved = draft(doctor, at(14, 0), "Bilal");
        resaved.notes = Some("confirmed".into());
        assert_eq!(reserve_slot(&mut store, &resaved, Some(b)).await.unwrap(), b);
        store.commit().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_references_become_404() {
        let Some(db) = test_pool().await else { return };

        let mut store = PgSlotStore::begin(&db).await.unwrap();
        let err = store.insert(&draft(-1, at(15, 0), "Ayesha")).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingReference("Doctor")), "{err:?}");
        let api = ApiError::from(GuardError::from(err));
        assert_eq!(api.status(), StatusCode::NOT_FOUND);
        assert_eq!(api.to_string(), "Doctor not found");
        drop(store);

        let doctor = new_doctor(&db, "Dr Refs").await;
        let mut ghost = draft(doctor, at(15, 0), "Ayesha");
        ghost.patient_id = Some(-1);
        let mut store = PgSlotStore::begin(&db).await.unwrap();
        let err = store.insert(&ghost).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingReference("Patient")), "{err:?}");
        drop(store);

        let mut store = PgSlotStore::begin(&db).await.unwrap();
        let missing = store.update(-1, &draft(doctor, at(15, 0), "Ayesha")).await.unwrap();
        assert!(!missing);
    }

    #[tokio::test]
    async fn listing_is_chronological_with_doctor_names() {
        let Some(db) = test_pool().await else { return };
        let doctor = new_doctor(&db, "Dr Order").await;
        let late = book(&db, &draft(doctor, at(16, 30), "Late")).await;
        let early = book(&db, &draft(doctor, at(8, 15), "Early")).await;
        let middle = book(&db, &draft(doctor, at(12, 45), "Middle")).await;

        let mine: Vec<AppointmentOut> = list_appointments(&db)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.doctor_id == doctor)
            .collect();
        let ids: Vec<i64> = mine.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![early, middle, late]);
        assert!(mine.iter().all(|a| a.doctor_name.as_deref() == Some("Dr Order")));

        let day = list_between(&db, at(0, 0), at(12, 0), Some(doctor)).await.unwrap();
        assert_eq!(day.iter().map(|a| a.id).collect::<Vec<_>>(), vec![early]);
    }
}
