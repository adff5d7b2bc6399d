//! Caller-facing operations on source materials.
//!
//! Every operation takes the authenticated caller id and checks ownership
//! before touching the ledger: project-scoped calls against the project
//! owner, material-scoped calls against the material's owner.
//!
//! Extraction never runs on the request path. `start_processing` hands the
//! material to whichever [`ExtractionDispatcher`] was chosen at startup and
//! returns; outcomes land in the ledger.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use folio_context::{
    ContextAssembler, ContextBudget, ContextBundle, GrepSearch, SourceMatches,
};
use folio_core::{
    contradicts_declared, defaults, new_v7, Error, MaterialFormat, MaterialLedger,
    MaterialStatus, MaterialSummary, NewSourceMaterial, ObjectStorage, ProjectDirectory, Result,
    SourceMaterial, StarredMessageSource, Transition, UploadSlot,
};
use folio_jobs::{DispatchMode, ExtractionDispatcher};

/// Parameters for [`MaterialService::request_upload_slot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    /// Display title; defaults to the filename without its extension.
    #[serde(default)]
    pub title: Option<String>,
}

/// Title derived from a filename: last path segment, extension dropped.
fn title_from_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename).trim();
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.trim().is_empty() => stem.trim().to_string(),
        _ => name.to_string(),
    }
}

#[derive(Clone)]
pub struct MaterialService {
    ledger: Arc<dyn MaterialLedger>,
    storage: Arc<dyn ObjectStorage>,
    projects: Arc<dyn ProjectDirectory>,
    dispatcher: Arc<dyn ExtractionDispatcher>,
    assembler: ContextAssembler,
    grep: GrepSearch,
    max_upload_bytes: i64,
}

impl MaterialService {
    pub fn new(
        ledger: Arc<dyn MaterialLedger>,
        storage: Arc<dyn ObjectStorage>,
        projects: Arc<dyn ProjectDirectory>,
        starred: Arc<dyn StarredMessageSource>,
        dispatcher: Arc<dyn ExtractionDispatcher>,
    ) -> Self {
        Self {
            assembler: ContextAssembler::new(ledger.clone(), projects.clone(), starred),
            grep: GrepSearch::new(ledger.clone()),
            ledger,
            storage,
            projects,
            dispatcher,
            max_upload_bytes: defaults::MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max: i64) -> Self {
        self.max_upload_bytes = max;
        self
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatcher.mode()
    }

    async fn authorize_project(&self, caller: Uuid, project_id: Uuid) -> Result<()> {
        match self.projects.project_owner(project_id).await? {
            None => Err(Error::NotFound(format!("project {project_id}"))),
            Some(owner) if owner != caller => Err(Error::PermissionDenied(format!(
                "project {project_id} belongs to another user"
            ))),
            Some(_) => Ok(()),
        }
    }

    async fn authorize_material(&self, caller: Uuid, material_id: Uuid) -> Result<SourceMaterial> {
        let material = self
            .ledger
            .get(material_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("material {material_id}")))?;
        if material.owner_id != caller {
            return Err(Error::PermissionDenied(format!(
                "material {material_id} belongs to another user"
            )));
        }
        Ok(material)
    }

    fn check_size(&self, size_bytes: i64) -> Result<()> {
        if size_bytes <= 0 {
            return Err(Error::InvalidInput("upload is empty".to_string()));
        }
        if size_bytes > self.max_upload_bytes {
            return Err(Error::InvalidInput(format!(
                "upload of {size_bytes} bytes exceeds the {} byte limit",
                self.max_upload_bytes
            )));
        }
        Ok(())
    }

    /// Validate an upload, create its pending row, and issue a write
    /// reference for the bytes.
    pub async fn request_upload_slot(
        &self,
        caller: Uuid,
        project_id: Uuid,
        request: UploadRequest,
    ) -> Result<UploadSlot> {
        self.authorize_project(caller, project_id).await?;

        let filename = request.filename.trim();
        if filename.is_empty() {
            return Err(Error::InvalidInput("filename is required".to_string()));
        }
        self.check_size(request.size_bytes)?;

        let declared_mime = request
            .mime_type
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty() && *m != defaults::DEFAULT_MIME_TYPE);
        let format = MaterialFormat::resolve(declared_mime.unwrap_or_default(), filename)
            .ok_or_else(|| Error::UnsupportedFormat(filename.to_string()))?;

        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| title_from_filename(filename));

        let material_id = new_v7();
        let write_reference = self
            .storage
            .issue_write_location(caller, material_id, filename)
            .await?;

        let material = self
            .ledger
            .create(NewSourceMaterial {
                id: material_id,
                project_id,
                owner_id: caller,
                title,
                original_filename: filename.to_string(),
                format,
                mime_type: declared_mime
                    .map(String::from)
                    .unwrap_or_else(|| format.mime_type().to_string()),
                size_bytes: request.size_bytes,
                storage_key: write_reference.clone(),
            })
            .await?;

        info!(
            subsystem = "api",
            component = "materials",
            op = "request_upload_slot",
            material_id = %material.id,
            project_id = %project_id,
            format = %format,
            size = request.size_bytes,
            "Upload slot issued"
        );

        Ok(UploadSlot {
            material_id: material.id,
            write_reference,
        })
    }

    /// Store the uploaded bytes at the material's write reference.
    ///
    /// Only pending materials accept content.
    pub async fn put_content(&self, caller: Uuid, material_id: Uuid, data: &[u8]) -> Result<()> {
        let material = self.authorize_material(caller, material_id).await?;
        if material.status != MaterialStatus::Pending {
            return Err(Error::Conflict(format!(
                "material {material_id} is {}; content can only be written while pending",
                material.status
            )));
        }
        self.check_size(data.len() as i64)?;
        if contradicts_declared(material.format, data) {
            return Err(Error::InvalidInput(format!(
                "content does not look like {}",
                material.format
            )));
        }

        self.storage.write(&material.storage_key, data).await?;
        debug!(
            subsystem = "api",
            component = "materials",
            op = "put_content",
            material_id = %material_id,
            size = data.len(),
            "Material content stored"
        );
        Ok(())
    }

    /// Start extraction for a material.
    ///
    /// A failed material is reset to pending first (explicit retry).
    /// Processing and completed materials are rejected.
    pub async fn start_processing(&self, caller: Uuid, material_id: Uuid) -> Result<()> {
        let material = self.authorize_material(caller, material_id).await?;

        match material.status {
            MaterialStatus::Pending => {}
            MaterialStatus::Failed => {
                self.ledger
                    .transition(material_id, Transition::Requeue)
                    .await?;
                info!(
                    subsystem = "api",
                    component = "materials",
                    material_id = %material_id,
                    previous_error = material.error_message.as_deref().unwrap_or(""),
                    "Failed material requeued for extraction"
                );
            }
            status @ (MaterialStatus::Processing | MaterialStatus::Completed) => {
                return Err(Error::Conflict(format!(
                    "material {material_id} is already {status}"
                )));
            }
        }

        self.dispatcher.dispatch(material_id).await?;
        info!(
            subsystem = "api",
            component = "materials",
            op = "start_processing",
            material_id = %material_id,
            dispatch_mode = %self.dispatcher.mode(),
            "Extraction dispatched"
        );
        Ok(())
    }

    /// Materials of a project, without extracted text.
    pub async fn list_materials(
        &self,
        caller: Uuid,
        project_id: Uuid,
    ) -> Result<Vec<MaterialSummary>> {
        self.authorize_project(caller, project_id).await?;
        self.ledger.list_by_project(project_id).await
    }

    /// One material including its extracted text.
    pub async fn get_material(&self, caller: Uuid, material_id: Uuid) -> Result<SourceMaterial> {
        self.authorize_material(caller, material_id).await
    }

    /// Flip the activation flag; returns the new value.
    pub async fn toggle_activation(&self, caller: Uuid, material_id: Uuid) -> Result<bool> {
        let material = self.authorize_material(caller, material_id).await?;
        let updated = self
            .ledger
            .set_activation(material_id, !material.is_active)
            .await?;
        debug!(
            subsystem = "api",
            component = "materials",
            material_id = %material_id,
            is_active = updated.is_active,
            "Material activation toggled"
        );
        Ok(updated.is_active)
    }

    /// Remove the stored object and the ledger row.
    pub async fn delete_material(&self, caller: Uuid, material_id: Uuid) -> Result<()> {
        let material = self.authorize_material(caller, material_id).await?;

        self.storage.delete(&material.storage_key).await?;
        if !self.ledger.delete(material_id).await? {
            warn!(
                subsystem = "api",
                component = "materials",
                material_id = %material_id,
                "Material vanished during delete"
            );
            return Err(Error::NotFound(format!("material {material_id}")));
        }

        info!(
            subsystem = "api",
            component = "materials",
            op = "delete_material",
            material_id = %material_id,
            project_id = %material.project_id,
            status = %material.status,
            "Material deleted"
        );
        Ok(())
    }

    pub async fn context_budget(&self, caller: Uuid, project_id: Uuid) -> Result<ContextBudget> {
        self.authorize_project(caller, project_id).await?;
        self.assembler.budget_report(project_id).await
    }

    pub async fn assemble_context(
        &self,
        caller: Uuid,
        project_id: Uuid,
        session_id: Option<Uuid>,
    ) -> Result<ContextBundle> {
        self.authorize_project(caller, project_id).await?;
        self.assembler.assemble(project_id, session_id).await
    }

    pub async fn search(
        &self,
        caller: Uuid,
        project_id: Uuid,
        query: &str,
    ) -> Result<Vec<SourceMatches>> {
        self.authorize_project(caller, project_id).await?;
        self.grep.search(project_id, query).await
    }
}
