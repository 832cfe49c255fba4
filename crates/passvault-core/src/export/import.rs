use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use passvault_storage::{CatalogRepository, NewAccount};
use serde::Serialize;
use tracing::info;

use super::document::ExportSections;
use super::{NodeCounts, report_failure};
use super::verify::{VerifyResult, XmlVerifyService};
use crate::error::ExportError;
use crate::events::{Event, EventDispatcher};

/// What an import changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub verified: VerifyResult,
    /// Rows inserted per section.
    pub created: NodeCounts,
    /// Rows matched by name to existing ones. Accounts are never reused.
    pub reused: NodeCounts,
}

/// Loads an export back into a catalog.
///
/// Categories, clients and tags are matched to existing rows by
/// case-insensitive name. Accounts are always inserted. Ids in the file are
/// remapped to the ids assigned by the catalog.
pub struct XmlImportService {
    catalog: Arc<dyn CatalogRepository>,
    verifier: XmlVerifyService,
    events: Arc<EventDispatcher>,
}

impl XmlImportService {
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogRepository>, events: Arc<EventDispatcher>) -> Self {
        Self {
            catalog,
            verifier: XmlVerifyService::new(Arc::clone(&events)),
            events,
        }
    }

    /// Import an export file.
    ///
    /// The file is fully verified, and every account reference checked,
    /// before anything is written.
    ///
    /// # Errors
    ///
    /// - Everything [`XmlVerifyService::verify`] returns.
    /// - [`ExportError::Corrupt`] if an account references a category,
    ///   client or tag not present in the file, or its pass is not base64.
    /// - [`ExportError::Storage`] if an insert fails.
    ///
    /// Storage and read failures are also dispatched as `export.failed`.
    pub async fn import(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<ImportSummary, ExportError> {
        let result = self.load(path, password).await;
        if let Err(e) = &result {
            report_failure(&self.events, "export", "import", path, e).await;
        }
        result
    }

    async fn load(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<ImportSummary, ExportError> {
        let (verified, sections) = self.verifier.read(path, password).await?;
        check_references(&sections, path)?;

        let mut created = NodeCounts::default();
        let mut reused = NodeCounts::default();

        let mut existing: HashMap<String, i64> = self
            .catalog
            .categories()
            .await?
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c.id))
            .collect();
        let mut category_ids = HashMap::new();
        for node in &sections.categories {
            let id = match existing.get(&node.name.to_lowercase()) {
                Some(&id) => {
                    reused.categories += 1;
                    id
                }
                None => {
                    let id = self
                        .catalog
                        .insert_category(&node.name, &node.description)
                        .await?;
                    existing.insert(node.name.to_lowercase(), id);
                    created.categories += 1;
                    id
                }
            };
            category_ids.insert(node.id, id);
        }

        let mut existing: HashMap<String, i64> = self
            .catalog
            .clients()
            .await?
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c.id))
            .collect();
        let mut client_ids = HashMap::new();
        for node in &sections.clients {
            let id = match existing.get(&node.name.to_lowercase()) {
                Some(&id) => {
                    reused.clients += 1;
                    id
                }
                None => {
                    let id = self
                        .catalog
                        .insert_client(&node.name, &node.description, node.global)
                        .await?;
                    existing.insert(node.name.to_lowercase(), id);
                    created.clients += 1;
                    id
                }
            };
            client_ids.insert(node.id, id);
        }

        let mut existing: HashMap<String, i64> = self
            .catalog
            .tags()
            .await?
            .into_iter()
            .map(|t| (t.name.to_lowercase(), t.id))
            .collect();
        let mut tag_ids = HashMap::new();
        for node in &sections.tags {
            let id = match existing.get(&node.name.to_lowercase()) {
                Some(&id) => {
                    reused.tags += 1;
                    id
                }
                None => {
                    let id = self.catalog.insert_tag(&node.name).await?;
                    existing.insert(node.name.to_lowercase(), id);
                    created.tags += 1;
                    id
                }
            };
            tag_ids.insert(node.id, id);
        }

        for node in &sections.accounts {
            let account = NewAccount {
                name: node.name.clone(),
                client_id: remap(&client_ids, node.client_id, "client", path)?,
                category_id: remap(&category_ids, node.category_id, "category", path)?,
                login: node.login.clone(),
                url: node.url.clone(),
                notes: node.notes.clone(),
                pass: decode_pass(&node.pass, node.id, path)?,
                tag_ids: node
                    .tag_ids()
                    .map(|id| remap(&tag_ids, id, "tag", path))
                    .collect::<Result<_, _>>()?,
            };
            self.catalog.insert_account(&account).await?;
            created.accounts += 1;
        }

        info!(
            file = %path.display(),
            accounts = created.accounts,
            categories_created = created.categories,
            categories_reused = reused.categories,
            clients_created = created.clients,
            clients_reused = reused.clients,
            tags_created = created.tags,
            tags_reused = reused.tags,
            "export imported"
        );
        self.events
            .dispatch(
                Event::new("export.imported", "catalog imported").with_details(serde_json::json!({
                    "file": path.display().to_string(),
                    "created": created,
                    "reused": reused,
                })),
            )
            .await;

        Ok(ImportSummary {
            verified,
            created,
            reused,
        })
    }
}

impl std::fmt::Debug for XmlImportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlImportService").finish_non_exhaustive()
    }
}

fn check_references(sections: &ExportSections, path: &Path) -> Result<(), ExportError> {
    let categories: HashSet<i64> = sections.categories.iter().map(|c| c.id).collect();
    let clients: HashSet<i64> = sections.clients.iter().map(|c| c.id).collect();
    let tags: HashSet<i64> = sections.tags.iter().map(|t| t.id).collect();

    for account in &sections.accounts {
        if !categories.contains(&account.category_id) {
            return Err(dangling(path, account.id, "category", account.category_id));
        }
        if !clients.contains(&account.client_id) {
            return Err(dangling(path, account.id, "client", account.client_id));
        }
        if let Some(tag) = account.tag_ids().find(|id| !tags.contains(id)) {
            return Err(dangling(path, account.id, "tag", tag));
        }
        decode_pass(&account.pass, account.id, path)?;
    }
    Ok(())
}

fn remap(ids: &HashMap<i64, i64>, id: i64, kind: &str, path: &Path) -> Result<i64, ExportError> {
    ids.get(&id).copied().ok_or_else(|| ExportError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("unknown {kind} {id}"),
    })
}

fn dangling(path: &Path, account: i64, kind: &str, id: i64) -> ExportError {
    ExportError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("account {account} references unknown {kind} {id}"),
    }
}

fn decode_pass(pass: &str, account: i64, path: &Path) -> Result<Vec<u8>, ExportError> {
    BASE64
        .decode(pass.trim())
        .map_err(|e| ExportError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("account {account}: pass is not base64: {e}"),
        })
}
