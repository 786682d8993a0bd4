use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

// ---------------------- STATUS ENUMS ----------------------

/// Status of a tool. `Ausgeliehen` mirrors the existence of an open lending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum ToolStatus {
    #[serde(rename = "verfügbar")]
    #[sqlx(rename = "verfügbar")]
    Verfuegbar,
    #[serde(rename = "ausgeliehen")]
    #[sqlx(rename = "ausgeliehen")]
    Ausgeliehen,
    #[serde(rename = "defekt")]
    #[sqlx(rename = "defekt")]
    Defekt,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Verfuegbar => "verfügbar",
            ToolStatus::Ausgeliehen => "ausgeliehen",
            ToolStatus::Defekt => "defekt",
        }
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TicketStatus {
    Offen,
    InBearbeitung,
    Erledigt,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Offen => "offen",
            TicketStatus::InBearbeitung => "in_bearbeitung",
            TicketStatus::Erledigt => "erledigt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TicketPriority {
    Niedrig,
    #[default]
    Normal,
    Hoch,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Niedrig => "niedrig",
            TicketPriority::Normal => "normal",
            TicketPriority::Hoch => "hoch",
        }
    }
}

// ---------------------- ROWS ----------------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tool {
    pub id: i64,
    pub barcode: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ToolStatus,
    pub category: Option<String>,
    pub location: Option<String>,
    pub deleted: bool,
    pub created_at: String,
    pub modified_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Worker {
    pub id: i64,
    pub barcode: String,
    pub firstname: String,
    pub lastname: String,
    pub department: Option<String>,
    pub email: Option<String>,
    pub deleted: bool,
    pub created_at: String,
    pub modified_at: String,
}

impl Worker {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Consumable {
    pub id: i64,
    pub barcode: String,
    pub name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub min_quantity: i64,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub deleted: bool,
    pub created_at: String,
    pub modified_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lending {
    pub id: i64,
    pub tool_barcode: String,
    pub worker_barcode: String,
    pub lent_at: String,
    pub returned_at: Option<String>,
}

/// A lending joined with tool and worker names for listings.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LendingView {
    pub id: i64,
    pub tool_barcode: String,
    pub tool_name: Option<String>,
    pub worker_barcode: String,
    pub worker_name: Option<String>,
    pub lent_at: String,
    pub returned_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConsumableUsage {
    pub id: i64,
    pub consumable_barcode: String,
    pub worker_barcode: Option<String>,
    pub quantity: i64,
    pub used_at: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Department {
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureState {
    pub feature: String,
    pub enabled: bool,
    /// `false` when the value comes from the configured default.
    pub explicit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub category: Option<String>,
    pub created_by: Option<String>,
    pub assigned_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketNote {
    pub id: i64,
    pub ticket_id: i64,
    pub author: Option<String>,
    pub text: String,
    pub created_at: String,
}

// ---------------------- REQUESTS ----------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateToolRequest {
    pub barcode: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateToolRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetToolStatusRequest {
    pub status: ToolStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkerRequest {
    pub barcode: String,
    pub firstname: String,
    pub lastname: String,
    pub department: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWorkerRequest {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConsumableRequest {
    pub barcode: String,
    pub name: String,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub min_quantity: Option<i64>,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConsumableRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub min_quantity: Option<i64>,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAdjustRequest {
    pub delta: i64,
    pub worker_barcode: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendRequest {
    pub tool_barcode: String,
    pub worker_barcode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub tool_barcode: String,
    pub worker_barcode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub consumable_barcode: String,
    pub worker_barcode: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDepartmentRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetFeatureRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TicketPriority>,
    pub category: Option<String>,
    pub created_by: Option<String>,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTicketRequest {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub category: Option<String>,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNoteRequest {
    pub author: Option<String>,
    pub text: String,
}

// ---------------------- RESPONSES ----------------------

/// The `{success, message, data}` envelope returned by every JSON endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    #[serde(skip)]
    status: Option<u16>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self { success: true, message: message.into(), data: Some(data), status: None }
    }

    pub fn created(message: impl Into<String>, data: T) -> Self {
        Self { success: true, message: message.into(), data: Some(data), status: Some(201) }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            self.status.and_then(|s| StatusCode::from_u16(s).ok()).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDetail {
    #[serde(flatten)]
    pub tool: Tool,
    pub current_lending: Option<LendingView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeKind {
    Tool,
    Worker,
    Consumable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarcodeLookup {
    pub kind: BarcodeKind,
    pub barcode: String,
    pub name: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDetail {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub notes: Vec<TicketNote>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct DashboardStats {
    pub tools_total: i64,
    pub tools_available: i64,
    pub tools_lent: i64,
    pub tools_defect: i64,
    pub workers_total: i64,
    pub consumables_total: i64,
    pub consumables_low_stock: i64,
    pub open_lendings: i64,
    pub open_tickets: i64,
}
