//! MongoDB-backed store. Requires a replica set: submissions run inside
//! multi-document transactions.
//!
//! Rows touched by a submission are write-locked with `findOneAndUpdate`, so a
//! second transaction racing on the same progress or user document aborts with
//! a `TransientTransactionError` (mapped to `StoreError::Conflict`) instead of
//! reading stale state.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    error::{ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR},
    options::{IndexOptions, ReadConcern, ReturnDocument, WriteConcern},
    Client, ClientSession, Collection, Database, IndexModel,
};
use uuid::Uuid;

use super::{ProgressStore, ProgressTransaction, StoreError, StoreResult};
use crate::metrics::track_db_operation;
use crate::models::progress::CompletedTask;
use crate::models::{Badge, Task, TaskQuestion, User, UserAnswer, UserBadge, UserTaskProgress};
use crate::utils::time::chrono_to_bson;

const USERS: &str = "users";
const TASKS: &str = "tasks";
const QUESTIONS: &str = "task_questions";
const PROGRESS: &str = "user_task_progress";
const ANSWERS: &str = "user_answers";
const BADGES: &str = "badges";
const USER_BADGES: &str = "user_badges";

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
            return StoreError::Conflict(err.to_string());
        }
        match *err.kind {
            ErrorKind::BsonDeserialization(_) => StoreError::Decode(err.to_string()),
            _ => StoreError::Backend(err),
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref we)) => we.code == 11000,
        ErrorKind::Command(ref ce) => ce.code == 11000,
        _ => false,
    }
}

fn bson_strings(values: Vec<Bson>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub fn new(client: Client, database: &str) -> Self {
        let db = client.database(database);
        Self { client, db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn users(&self) -> Collection<User> {
        self.db.collection(USERS)
    }

    fn tasks(&self) -> Collection<Task> {
        self.db.collection(TASKS)
    }

    fn progress(&self) -> Collection<UserTaskProgress> {
        self.db.collection(PROGRESS)
    }

    fn badges(&self) -> Collection<Badge> {
        self.db.collection(BADGES)
    }

    fn user_badges(&self) -> Collection<UserBadge> {
        self.db.collection(USER_BADGES)
    }

    /// Creates the unique indexes that back find-or-create semantics.
    pub async fn ensure_indexes(&self) -> StoreResult<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.progress()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "task_id": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        self.user_badges()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "badge_id": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        self.badges()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        self.db
            .collection::<Document>(QUESTIONS)
            .create_index(IndexModel::builder().keys(doc! { "task_id": 1 }).build())
            .await?;
        self.db
            .collection::<Document>(ANSWERS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "progress_id": 1, "is_correct": 1 })
                    .build(),
            )
            .await?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for MongoStore {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn ProgressTransaction>> {
        let mut session = self.client.start_session().await?;
        session
            .start_transaction()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::majority())
            .await?;
        Ok(Box::new(MongoTransaction {
            session,
            db: self.db.clone(),
        }))
    }

    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        track_db_operation("find_one", USERS, async {
            Ok::<_, StoreError>(self.users().find_one(doc! { "_id": user_id }).await?)
        })
        .await
    }

    async fn find_question(&self, question_id: &str) -> StoreResult<Option<TaskQuestion>> {
        track_db_operation("find_one", QUESTIONS, async {
            Ok::<_, StoreError>(
                self.db
                    .collection::<TaskQuestion>(QUESTIONS)
                    .find_one(doc! { "_id": question_id })
                    .await?,
            )
        })
        .await
    }

    async fn user_ids(&self) -> StoreResult<Vec<String>> {
        let ids = self.users().distinct("_id", doc! {}).await?;
        Ok(bson_strings(ids))
    }

    async fn completion_history(&self, user_id: &str) -> StoreResult<Vec<CompletedTask>> {
        let rows: Vec<UserTaskProgress> = track_db_operation("find", PROGRESS, async {
            let cursor = self
                .progress()
                .find(doc! { "user_id": user_id, "is_completed": true })
                .sort(doc! { "completed_at": 1, "task_id": 1 })
                .await?;
            Ok::<_, StoreError>(cursor.try_collect().await?)
        })
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let task_ids: Vec<&str> = rows.iter().map(|p| p.task_id.as_str()).collect();
        let tasks: Vec<Task> = track_db_operation("find", TASKS, async {
            let cursor = self
                .tasks()
                .find(doc! { "_id": { "$in": task_ids } })
                .await?;
            Ok::<_, StoreError>(cursor.try_collect().await?)
        })
        .await?;
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        Ok(rows
            .iter()
            .filter_map(|p| {
                by_id.get(p.task_id.as_str()).map(|task| CompletedTask {
                    task_id: task.id.clone(),
                    language: task.language.clone(),
                    task_type: task.task_type,
                    completed_at: p.completed_at,
                })
            })
            .collect())
    }

    async fn unfinished_tasks(&self, user_id: &str) -> StoreResult<Vec<Task>> {
        let completed = self
            .progress()
            .distinct("task_id", doc! { "user_id": user_id, "is_completed": true })
            .await?;

        track_db_operation("find", TASKS, async {
            let cursor = self
                .tasks()
                .find(doc! {
                    "_id": { "$nin": completed },
                    "is_active": { "$ne": false },
                })
                .sort(doc! { "_id": 1 })
                .await?;
            Ok::<_, StoreError>(cursor.try_collect().await?)
        })
        .await
    }

    async fn count_completed(&self, user_id: &str) -> StoreResult<u64> {
        track_db_operation("count", PROGRESS, async {
            Ok::<_, StoreError>(
                self.progress()
                    .count_documents(doc! { "user_id": user_id, "is_completed": true })
                    .await?,
            )
        })
        .await
    }

    async fn list_badges(&self) -> StoreResult<Vec<Badge>> {
        let cursor = self.badges().find(doc! {}).sort(doc! { "name": 1 }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn granted_badge_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let ids = self
            .user_badges()
            .distinct("badge_id", doc! { "user_id": user_id })
            .await?;
        Ok(bson_strings(ids))
    }

    async fn grant_badge(
        &self,
        user_id: &str,
        badge_id: &str,
        achieved_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = self
            .user_badges()
            .update_one(
                doc! { "user_id": user_id, "badge_id": badge_id },
                doc! { "$setOnInsert": { "achieved_at": chrono_to_bson(achieved_at) } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(update) => Ok(update.upserted_id.is_some()),
            // Lost the race against a concurrent grant of the same badge
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_badge(&self, name: &str, description: &str) -> StoreResult<Badge> {
        let id = Uuid::new_v4().to_string();
        let result = self
            .badges()
            .find_one_and_update(
                doc! { "name": name },
                doc! { "$setOnInsert": { "_id": id.as_str(), "description": description } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await;

        let badge = match result {
            Ok(badge) => badge,
            Err(e) if is_duplicate_key(&e) => self.badges().find_one(doc! { "name": name }).await?,
            Err(e) => return Err(e.into()),
        };
        badge.ok_or_else(|| StoreError::Decode(format!("badge {} missing after upsert", name)))
    }
}

pub struct MongoTransaction {
    session: ClientSession,
    db: Database,
}

#[async_trait]
impl ProgressTransaction for MongoTransaction {
    async fn find_task(&mut self, task_id: &str) -> StoreResult<Option<Task>> {
        Ok(self
            .db
            .collection::<Task>(TASKS)
            .find_one(doc! { "_id": task_id })
            .session(&mut self.session)
            .await?)
    }

    async fn find_question(&mut self, question_id: &str) -> StoreResult<Option<TaskQuestion>> {
        Ok(self
            .db
            .collection::<TaskQuestion>(QUESTIONS)
            .find_one(doc! { "_id": question_id })
            .session(&mut self.session)
            .await?)
    }

    async fn find_user(&mut self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self
            .db
            .collection::<User>(USERS)
            .find_one(doc! { "_id": user_id })
            .session(&mut self.session)
            .await?)
    }

    async fn lock_progress(
        &mut self,
        user_id: &str,
        task_id: &str,
    ) -> StoreResult<UserTaskProgress> {
        let id = Uuid::new_v4().to_string();
        let update = doc! {
            "$setOnInsert": {
                "_id": id.as_str(),
                "progress": 0.0,
                "attempts": 0_i64,
                "mistakes": 0_i64,
                "is_completed": false,
            },
            "$set": { "locked_at": chrono_to_bson(Utc::now()) },
        };

        let result = track_db_operation("find_one_and_update", PROGRESS, async {
            self.db
                .collection::<UserTaskProgress>(PROGRESS)
                .find_one_and_update(doc! { "user_id": user_id, "task_id": task_id }, update)
                .upsert(true)
                .return_document(ReturnDocument::After)
                .session(&mut self.session)
                .await
        })
        .await;

        let row = match result {
            Ok(row) => row,
            // A racing first submission inserted the row after our snapshot
            Err(e) if is_duplicate_key(&e) => return Err(StoreError::Conflict(e.to_string())),
            Err(e) => return Err(e.into()),
        };

        row.ok_or_else(|| StoreError::Decode("progress upsert returned no document".to_string()))
    }

    async fn lock_user(&mut self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self
            .db
            .collection::<User>(USERS)
            .find_one_and_update(
                doc! { "_id": user_id },
                doc! { "$set": { "locked_at": chrono_to_bson(Utc::now()) } },
            )
            .return_document(ReturnDocument::After)
            .session(&mut self.session)
            .await?)
    }

    async fn insert_answer(&mut self, answer: &UserAnswer) -> StoreResult<()> {
        track_db_operation("insert_one", ANSWERS, async {
            self.db
                .collection::<UserAnswer>(ANSWERS)
                .insert_one(answer)
                .session(&mut self.session)
                .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn count_questions(&mut self, task_id: &str) -> StoreResult<u64> {
        Ok(self
            .db
            .collection::<Document>(QUESTIONS)
            .count_documents(doc! { "task_id": task_id })
            .session(&mut self.session)
            .await?)
    }

    async fn count_correct_questions(&mut self, progress_id: &str) -> StoreResult<u64> {
        let distinct = self
            .db
            .collection::<Document>(ANSWERS)
            .distinct(
                "question_id",
                doc! { "progress_id": progress_id, "is_correct": true },
            )
            .session(&mut self.session)
            .await?;
        Ok(distinct.len() as u64)
    }

    async fn save_progress(&mut self, progress: &UserTaskProgress) -> StoreResult<()> {
        track_db_operation("replace_one", PROGRESS, async {
            self.db
                .collection::<UserTaskProgress>(PROGRESS)
                .replace_one(doc! { "_id": progress.id.as_str() }, progress)
                .session(&mut self.session)
                .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn save_user(&mut self, user: &User) -> StoreResult<()> {
        let level = i64::from(user.level);
        let xp = i64::try_from(user.xp).unwrap_or(i64::MAX);
        let points = i64::try_from(user.points).unwrap_or(i64::MAX);
        let streak = i64::from(user.streak_count);
        let last_active = user.last_active_date.map(chrono_to_bson);
        let update = doc! {
            "$set": {
                "level": level,
                "xp": xp,
                "points": points,
                "streak_count": streak,
                "last_active_date": last_active,
            },
            "$unset": { "locked_at": "" },
        };
        track_db_operation("update_one", USERS, async {
            self.db
                .collection::<User>(USERS)
                .update_one(doc! { "_id": user.id.as_str() }, update)
                .session(&mut self.session)
                .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = *self;
        this.session.commit_transaction().await?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        let mut this = *self;
        this.session.abort_transaction().await?;
        Ok(())
    }
}
