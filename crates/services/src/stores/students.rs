use std::collections::BTreeMap;
use std::sync::Mutex;

use storage::{LocalDatabase, StoreName};
use tracing::{info, warn};
use tutor_core::Clock;
use tutor_core::model::{DeductHoursReply, Student, StudentId, UserId};

use crate::api::{ApiClient, ApiRequest};
use crate::error::StoreError;
use crate::stores::{is_offline, load_owned, lock, persist_owned};

pub struct StudentStore {
    api: ApiClient,
    local: LocalDatabase,
    clock: Clock,
    students: Mutex<BTreeMap<StudentId, Student>>,
}

impl StudentStore {
    #[must_use]
    pub fn new(api: ApiClient, local: LocalDatabase, clock: Clock) -> Self {
        Self {
            api,
            local,
            clock,
            students: Mutex::new(BTreeMap::new()),
        }
    }

    /// Students visible to the current account, replacing the mirror.
    ///
    /// Offline, answers from the students this account was last shown, when
    /// there are any.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the call fails and no local copy helps.
    pub async fn fetch_students(&self) -> Result<Vec<Student>, StoreError> {
        let owner = self.owner();
        let students: Vec<Student> = match self.api.get(&["api", "students"]).await {
            Ok(students) => students,
            Err(err) if is_offline(&err) => {
                let cached: Vec<Student> = load_owned(&self.local, StoreName::Students, owner.as_ref()).await?;
                if cached.is_empty() {
                    return Err(err.into());
                }
                warn!(count = cached.len(), "backend unreachable, using local students");
                self.replace(&cached);
                return Ok(cached);
            }
            Err(err) => return Err(err.into()),
        };

        self.replace(&students);
        for student in &students {
            self.remember(owner.as_ref(), student).await;
        }
        Ok(students)
    }

    fn owner(&self) -> Option<UserId> {
        self.api.context().current_user_id()
    }

    async fn remember(&self, owner: Option<&UserId>, student: &Student) {
        if let Some(owner) = owner {
            persist_owned(&self.local, StoreName::Students, owner, &student.id.to_string(), student).await;
        }
    }

    fn replace(&self, students: &[Student]) {
        *lock(&self.students) = students.iter().map(|s| (s.id, s.clone())).collect();
    }

    /// Mirror snapshot, ordered by id.
    #[must_use]
    pub fn students(&self) -> Vec<Student> {
        lock(&self.students).values().cloned().collect()
    }

    /// One student, from the mirror or else the backend.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend lookup fails.
    pub async fn get_student(&self, id: StudentId) -> Result<Student, StoreError> {
        if let Some(student) = lock(&self.students).get(&id).cloned() {
            return Ok(student);
        }
        let key = id.to_string();
        let student: Student = self.api.get(&["api", "students", key.as_str()]).await?;
        lock(&self.students).insert(id, student.clone());
        self.remember(self.owner().as_ref(), &student).await;
        Ok(student)
    }

    /// Deducts lesson hours after checking the balance locally.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Student` when the local check fails (no request is
    /// sent) and `StoreError::Api` when the backend refuses.
    pub async fn deduct_hours(&self, id: StudentId, hours: f64) -> Result<DeductHoursReply, StoreError> {
        let student = self.get_student(id).await?;
        student.check_deduction(hours)?;

        let key = id.to_string();
        let request = ApiRequest::post(&["api", "students", key.as_str(), "deduct-hours"]).query("hours", hours);
        let reply: DeductHoursReply = self.api.call(request).await?;

        let updated = {
            let mut students = lock(&self.students);
            students.get_mut(&id).map(|s| {
                s.remaining_hours = reply.remaining_hours;
                s.updated_at = self.clock.now();
                s.clone()
            })
        };
        if let Some(student) = updated {
            self.remember(self.owner().as_ref(), &student).await;
        }
        info!(student = %id, hours, remaining = reply.remaining_hours, "hours deducted");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Method, TransportError};
    use crate::error::ApiError;
    use crate::context::AuthSession;
    use crate::stores::testing::{harness, teacher};
    use serde_json::json;
    use tutor_core::model::{StudentError, User};
    use tutor_core::time::fixed_clock;

    fn students_json() -> serde_json::Value {
        json!([
            {
                "id": 1,
                "teacher_id": "teacher-1",
                "name": "Lily",
                "remaining_hours": 2.0,
                "created_at": "2025-01-14T08:00:00",
                "updated_at": "2025-01-14T08:00:00"
            },
            {
                "id": 2,
                "teacher_id": "teacher-1",
                "name": "Tom",
                "email": "tom@example.com",
                "remaining_hours": 0.5,
                "created_at": "2025-01-14T08:00:00Z",
                "updated_at": "2025-01-14T08:00:00Z"
            }
        ])
    }

    #[tokio::test]
    async fn fetch_mirrors_and_persists() {
        let h = harness();
        h.transport.ok(Method::Get, "/api/students", students_json());
        let store = StudentStore::new(h.api.clone(), h.local.clone(), fixed_clock());

        let students = store.fetch_students().await.unwrap();

        assert_eq!(students.len(), 2);
        assert_eq!(store.students()[1].name, "Tom");
        let saved: Vec<Student> = h.local.load_all(StoreName::Students).await.unwrap();
        assert_eq!(saved.len(), 2);
    }

    #[tokio::test]
    async fn offline_fetch_uses_local_copy() {
        let h = harness();
        h.transport.ok(Method::Get, "/api/students", students_json());
        let store = StudentStore::new(h.api.clone(), h.local.clone(), fixed_clock());
        store.fetch_students().await.unwrap();

        h.transport.fail(Method::Get, "/api/students", TransportError::Timeout);
        let fresh = StudentStore::new(h.api.clone(), h.local.clone(), fixed_clock());
        let students = fresh.fetch_students().await.unwrap();

        assert_eq!(students.len(), 2);
        assert_eq!(fresh.students().len(), 2);
    }

    #[tokio::test]
    async fn offline_copy_stays_with_its_account() {
        let h = harness();
        h.transport.ok(Method::Get, "/api/students", students_json());
        let store = StudentStore::new(h.api.clone(), h.local.clone(), fixed_clock());
        store.fetch_students().await.unwrap();

        let other = User {
            id: UserId::from("teacher-2"),
            username: "second".into(),
            ..teacher()
        };
        h.context.set_session(AuthSession {
            token: "token-2".into(),
            user: Some(other),
        });
        h.transport.fail(Method::Get, "/api/students", TransportError::Timeout);
        let fresh = StudentStore::new(h.api.clone(), h.local.clone(), fixed_clock());

        let err = fresh.fetch_students().await.unwrap_err();
        assert!(matches!(err, StoreError::Api(ApiError::Network(_))));
        assert!(fresh.students().is_empty());

        h.context.set_session(AuthSession {
            token: "token".into(),
            user: Some(teacher()),
        });
        assert_eq!(fresh.fetch_students().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn offline_fetch_without_copy_fails() {
        let h = harness();
        h.transport.fail(Method::Get, "/api/students", TransportError::Timeout);
        let store = StudentStore::new(h.api.clone(), h.local.clone(), fixed_clock());

        let err = store.fetch_students().await.unwrap_err();
        assert!(matches!(err, StoreError::Api(ApiError::Network(_))));
    }

    #[tokio::test]
    async fn deduct_hours_updates_mirror() {
        let h = harness();
        h.transport.ok(Method::Get, "/api/students", students_json());
        h.transport.ok(
            Method::Post,
            "/api/students/1/deduct-hours",
            json!({"message": "ok", "remaining_hours": 1.5}),
        );
        let store = StudentStore::new(h.api.clone(), h.local.clone(), fixed_clock());
        store.fetch_students().await.unwrap();

        let reply = store.deduct_hours(StudentId::new(1), 0.5).await.unwrap();

        assert!((reply.remaining_hours - 1.5).abs() < f64::EPSILON);
        let lily = store.get_student(StudentId::new(1)).await.unwrap();
        assert!((lily.remaining_hours - 1.5).abs() < f64::EPSILON);
        let sent = h.transport.requests_to(Method::Post, "/api/students/1/deduct-hours");
        assert_eq!(sent[0].query, vec![("hours".to_owned(), "0.5".to_owned())]);
    }

    #[tokio::test]
    async fn insufficient_hours_never_reach_backend() {
        let h = harness();
        h.transport.ok(Method::Get, "/api/students", students_json());
        let store = StudentStore::new(h.api.clone(), h.local.clone(), fixed_clock());
        store.fetch_students().await.unwrap();

        let err = store.deduct_hours(StudentId::new(2), 1.0).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::Student(StudentError::InsufficientHours { .. })
        ));
        assert!(h.transport.requests_to(Method::Post, "/api/students/2/deduct-hours").is_empty());
    }

    #[tokio::test]
    async fn backend_refusal_is_surfaced() {
        let h = harness();
        h.transport.ok(Method::Get, "/api/students", students_json());
        h.transport.respond(
            Method::Post,
            "/api/students/1/deduct-hours",
            400,
            json!({"detail": "insufficient hours"}),
        );
        let store = StudentStore::new(h.api.clone(), h.local.clone(), fixed_clock());
        store.fetch_students().await.unwrap();

        let err = store.deduct_hours(StudentId::new(1), 1.0).await.unwrap_err();

        assert_eq!(err.to_string(), "insufficient hours");
        assert_eq!(h.notifier.take().len(), 1);
    }
}
