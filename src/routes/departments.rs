use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    db::now_iso,
    error::{AppError, AppResult},
    middleware::validation::require_text,
    state::AppState,
    types::{ApiResponse, CreateDepartmentRequest, Department, FeatureState, SetFeatureRequest},
};

/// Feature areas that can be switched per department.
pub const KNOWN_FEATURES: [&str; 5] = ["tools", "consumables", "lending", "tickets", "workers"];

async fn ensure_exists(state: &AppState, name: &str) -> AppResult<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM departments WHERE name = ?1")
        .bind(name)
        .fetch_optional(&state.db)
        .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(format!("Abteilung {} nicht gefunden", name))),
    }
}

pub async fn list_departments(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<Department>>> {
    let departments = sqlx::query_as::<_, Department>(
        "SELECT name, created_at FROM departments ORDER BY name COLLATE NOCASE",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(ApiResponse::ok(format!("{} Abteilungen", departments.len()), departments))
}

pub async fn create_department(
    State(state): State<AppState>,
    Json(req): Json<CreateDepartmentRequest>,
) -> AppResult<ApiResponse<Department>> {
    let name = require_text("name", &req.name, 100)?;
    let department = sqlx::query_as::<_, Department>(
        "INSERT INTO departments (name, created_at) VALUES (?1, ?2) RETURNING name, created_at",
    )
    .bind(&name)
    .bind(now_iso())
    .fetch_one(&state.db)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict(format!("Abteilung {} existiert bereits", name)),
        other => other,
    })?;

    tracing::info!(department = %department.name, "Department created");
    Ok(ApiResponse::created("Abteilung angelegt", department))
}

/// Effective state of every known feature; missing rows fall back to the configured default.
pub async fn department_features(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<ApiResponse<Vec<FeatureState>>> {
    ensure_exists(&state, &name).await?;

    let rows: Vec<(String, bool)> =
        sqlx::query_as("SELECT feature, enabled FROM department_features WHERE department = ?1")
            .bind(&name)
            .fetch_all(&state.db)
            .await?;
    let explicit: HashMap<String, bool> = rows.into_iter().collect();
    let default = state.config.departments.features_enabled_by_default;

    let features = KNOWN_FEATURES
        .iter()
        .map(|f| match explicit.get(*f) {
            Some(enabled) => FeatureState { feature: f.to_string(), enabled: *enabled, explicit: true },
            None => FeatureState { feature: f.to_string(), enabled: default, explicit: false },
        })
        .collect();

    Ok(ApiResponse::ok(format!("Funktionen der Abteilung {}", name), features))
}

pub async fn set_department_feature(
    State(state): State<AppState>,
    Path((name, feature)): Path<(String, String)>,
    Json(req): Json<SetFeatureRequest>,
) -> AppResult<ApiResponse<FeatureState>> {
    if !KNOWN_FEATURES.contains(&feature.as_str()) {
        return Err(AppError::ValidationError {
            field: "feature".to_string(),
            message: format!("Unbekannte Funktion '{}', erlaubt: {}", feature, KNOWN_FEATURES.join(", ")),
        });
    }
    ensure_exists(&state, &name).await?;

    sqlx::query(
        r#"INSERT INTO department_features (department, feature, enabled) VALUES (?1, ?2, ?3)
           ON CONFLICT(department, feature) DO UPDATE SET enabled = excluded.enabled"#,
    )
    .bind(&name)
    .bind(&feature)
    .bind(req.enabled)
    .execute(&state.db)
    .await?;

    tracing::info!(department = %name, %feature, enabled = req.enabled, "Department feature changed");
    let message = if req.enabled { "Funktion aktiviert" } else { "Funktion deaktiviert" };
    Ok(ApiResponse::ok(message, FeatureState { feature, enabled: req.enabled, explicit: true }))
}
