use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::Subcommand;
use physio_core::upload::DocumentFormat;
use serde_json::json;
use uuid::Uuid;

use crate::util::{api_request, exit_error, read_json_from_file};

const SESSIONS: &str = "/v1/document-imports/sessions";

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Start a new import session
    Create {
        /// Patient the import is for
        #[arg(long)]
        patient_id: Option<String>,
        /// Assign created exercise sets to the patient
        #[arg(long)]
        assign_sets: bool,
    },
    /// Show the wizard state of a session
    Show {
        #[arg(long)]
        session_id: Uuid,
    },
    /// Select the document to analyse
    Upload {
        #[arg(long)]
        session_id: Uuid,
        /// Path to the treatment document
        #[arg(long)]
        file: String,
        /// MIME type (guessed from the extension when omitted)
        #[arg(long)]
        mime_type: Option<String>,
    },
    /// Run the document analysis
    Analyze {
        #[arg(long)]
        session_id: Uuid,
        /// Free-text hint for the extraction
        #[arg(long)]
        context: Option<String>,
    },
    /// Apply wizard actions from a JSON array (or a single action object)
    Action {
        #[arg(long)]
        session_id: Uuid,
        /// Actions JSON (use '-' for stdin)
        #[arg(long)]
        actions_file: String,
    },
    /// List extracted exercises through a review filter
    Exercises {
        #[arg(long)]
        session_id: Uuid,
        /// all, create, reuse, skip or matched
        #[arg(long)]
        filter: Option<String>,
    },
    /// Preview the import request
    Request {
        #[arg(long)]
        session_id: Uuid,
    },
    /// Send the import to the backend
    Import {
        #[arg(long)]
        session_id: Uuid,
    },
    /// Drop a session
    Delete {
        #[arg(long)]
        session_id: Uuid,
    },
}

pub async fn run(api_url: &str, command: SessionCommands) -> i32 {
    match command {
        SessionCommands::Create {
            patient_id,
            assign_sets,
        } => {
            let body = json!({
                "patientId": patient_id,
                "assignSetsToPatient": assign_sets,
            });
            api_request(api_url, reqwest::Method::POST, SESSIONS, Some(body), &[]).await
        }
        SessionCommands::Show { session_id } => {
            let path = format!("{SESSIONS}/{session_id}");
            api_request(api_url, reqwest::Method::GET, &path, None, &[]).await
        }
        SessionCommands::Upload {
            session_id,
            file,
            mime_type,
        } => upload(api_url, session_id, &file, mime_type).await,
        SessionCommands::Analyze {
            session_id,
            context,
        } => {
            let path = format!("{SESSIONS}/{session_id}/analyze");
            let body = json!({ "context": context });
            api_request(api_url, reqwest::Method::POST, &path, Some(body), &[]).await
        }
        SessionCommands::Action {
            session_id,
            actions_file,
        } => {
            let actions = match read_json_from_file(&actions_file) {
                Ok(v) => actions_payload(v),
                Err(e) => exit_error(&e, Some("Provide a JSON array of wizard actions.")),
            };
            let path = format!("{SESSIONS}/{session_id}/actions");
            api_request(api_url, reqwest::Method::POST, &path, Some(actions), &[]).await
        }
        SessionCommands::Exercises { session_id, filter } => {
            let path = format!("{SESSIONS}/{session_id}/exercises");
            let query: Vec<(String, String)> = filter
                .into_iter()
                .map(|f| ("filter".to_string(), f))
                .collect();
            api_request(api_url, reqwest::Method::GET, &path, None, &query).await
        }
        SessionCommands::Request { session_id } => {
            let path = format!("{SESSIONS}/{session_id}/request");
            api_request(api_url, reqwest::Method::GET, &path, None, &[]).await
        }
        SessionCommands::Import { session_id } => {
            let path = format!("{SESSIONS}/{session_id}/import");
            api_request(api_url, reqwest::Method::POST, &path, None, &[]).await
        }
        SessionCommands::Delete { session_id } => {
            let path = format!("{SESSIONS}/{session_id}");
            api_request(api_url, reqwest::Method::DELETE, &path, None, &[]).await
        }
    }
}

async fn upload(api_url: &str, session_id: Uuid, file: &str, mime_type: Option<String>) -> i32 {
    let bytes = match std::fs::read(file) {
        Ok(b) => b,
        Err(e) => exit_error(&format!("Failed to read file '{file}': {e}"), None),
    };
    let file_name = Path::new(file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file)
        .to_string();
    let mime_type = mime_type.or_else(|| guess_mime_type(&file_name));

    let body = json!({
        "fileName": file_name,
        "mimeType": mime_type,
        "contentBase64": STANDARD.encode(&bytes),
    });
    let path = format!("{SESSIONS}/{session_id}/document");
    api_request(api_url, reqwest::Method::POST, &path, Some(body), &[]).await
}

fn guess_mime_type(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    DocumentFormat::from_extension(ext).map(|f| f.mime_type().to_string())
}

/// Accept a bare array, a single action or an `{"actions": [...]}` object.
fn actions_payload(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(_) => json!({ "actions": value }),
        serde_json::Value::Object(ref map) if map.contains_key("actions") => value,
        other => json!({ "actions": [other] }),
    }
}
