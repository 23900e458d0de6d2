use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    error::EngineError,
    extractors::ValidJson,
    middlewares::auth::JwtClaims,
    models::{
        answer::{SubmitAnswerRequest, SubmitAnswerResponse},
        recommendation::RecommendedTask,
        user::UserStats,
    },
    services::{progress_engine::AnswerSubmission, AppState},
};

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidJson(req): ValidJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let submission = AnswerSubmission {
        user_id: claims.sub,
        task_id: req.task_id,
        question_id: req.question_id,
        answer: req.answer,
    };

    match state.engine.submit_answer(&submission).await {
        Ok(outcome) => {
            let levels = state.engine.rewards().levels();
            let level_progress = outcome
                .updated_user
                .as_ref()
                .map(|user| levels.progress(user.level, user.xp));

            Ok(Json(SubmitAnswerResponse {
                is_correct: outcome.is_correct,
                is_completed: outcome.is_completed,
                updated_user: outcome.updated_user.as_ref().map(UserStats::from),
                leveled_up: outcome.reward.as_ref().is_some_and(|r| r.leveled_up()),
                level_progress,
                streak_change: outcome.reward.as_ref().map(|r| r.streak),
            }))
        }
        Err(e @ EngineError::NotFound(_)) => Err((StatusCode::NOT_FOUND, e.to_string())),
        Err(EngineError::AlreadyCompleted { .. }) => Err((
            StatusCode::CONFLICT,
            "Task already completed".to_string(),
        )),
        Err(EngineError::Storage(_)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Could not save attempt".to_string(),
        )),
    }
}

pub async fn recommended_tasks(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::debug!("Building recommendations for user_id: {}", claims.sub);

    match state.recommender.recommend(&claims.sub).await {
        Ok(ranked) => {
            let tasks: Vec<RecommendedTask> = ranked.into_iter().map(RecommendedTask::from).collect();
            Ok(Json(tasks))
        }
        Err(e @ EngineError::NotFound(_)) => Err((StatusCode::NOT_FOUND, e.to_string())),
        Err(_) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Recommendation engine failure".to_string(),
        )),
    }
}
