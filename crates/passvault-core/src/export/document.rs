//! XML document model.
//!
//! ```xml
//! <Root>
//!   <Meta><Generator/><Version/><Time/><Hash/></Meta>
//!   <Categories count="1"><Category id=".."><name/><description/></Category></Categories>
//!   <Clients count="1"><Client id=".."><name/><description/><global/></Client></Clients>
//!   <Tags count="1"><Tag id=".."><name/></Tag></Tags>
//!   <Accounts count="1"><Account id="..">..<tags><tag id=".."/></tags></Account></Accounts>
//! </Root>
//! ```
//!
//! Encrypted documents replace the four sections with
//! `<Encrypted salt=".."><Data node="Categories">..</Data>..</Encrypted>`,
//! each `Data` holding base64 of `nonce || ciphertext || tag` over that
//! section's XML.
//!
//! `Meta/Hash` is SHA-256 over the JSON form of the sections in a plain
//! document, and over the sealed `Data` payloads in an encrypted one, so an
//! encrypted file says nothing about its plaintext.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use passvault_storage::{AccountRecord, CategoryRecord, ClientRecord, TagRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{ExportKey, ExportProtection, GENERATOR, NodeCounts};
use crate::crypto;
use crate::error::{CryptoError, ExportError};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

const CATEGORIES: &str = "Categories";
const CLIENTS: &str = "Clients";
const TAGS: &str = "Tags";
const ACCOUNTS: &str = "Accounts";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryNode {
    #[serde(rename = "@id")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientNode {
    #[serde(rename = "@id")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub global: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagNode {
    #[serde(rename = "@id")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    #[serde(rename = "@id")]
    pub id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTags {
    #[serde(rename = "tag", default)]
    pub items: Vec<TagRef>,
}

/// An account as exported. `pass` is base64 of the stored ciphertext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountNode {
    #[serde(rename = "@id")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "clientId")]
    pub client_id: i64,
    #[serde(rename = "categoryId")]
    pub category_id: i64,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub tags: AccountTags,
}

impl std::fmt::Debug for AccountNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pass", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl AccountNode {
    pub fn tag_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.tags.items.iter().map(|t| t.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct CategoriesNode {
    #[serde(rename = "@count", default)]
    count: usize,
    #[serde(rename = "Category", default)]
    items: Vec<CategoryNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ClientsNode {
    #[serde(rename = "@count", default)]
    count: usize,
    #[serde(rename = "Client", default)]
    items: Vec<ClientNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TagsNode {
    #[serde(rename = "@count", default)]
    count: usize,
    #[serde(rename = "Tag", default)]
    items: Vec<TagNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct AccountsNode {
    #[serde(rename = "@count", default)]
    count: usize,
    #[serde(rename = "Account", default)]
    items: Vec<AccountNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Meta {
    #[serde(rename = "Generator")]
    pub generator: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Time")]
    pub time: i64,
    #[serde(rename = "Hash")]
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DataNode {
    #[serde(rename = "@node")]
    node: String,
    #[serde(rename = "$text", default)]
    payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EncryptedNode {
    #[serde(rename = "@salt")]
    salt: String,
    #[serde(rename = "Data", default)]
    data: Vec<DataNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "Root")]
pub(crate) struct ExportDocument {
    #[serde(rename = "Meta")]
    pub meta: Meta,
    #[serde(rename = "Categories", default, skip_serializing_if = "Option::is_none")]
    categories: Option<CategoriesNode>,
    #[serde(rename = "Clients", default, skip_serializing_if = "Option::is_none")]
    clients: Option<ClientsNode>,
    #[serde(rename = "Tags", default, skip_serializing_if = "Option::is_none")]
    tags: Option<TagsNode>,
    #[serde(rename = "Accounts", default, skip_serializing_if = "Option::is_none")]
    accounts: Option<AccountsNode>,
    #[serde(rename = "Encrypted", default, skip_serializing_if = "Option::is_none")]
    encrypted: Option<EncryptedNode>,
}

impl ExportDocument {
    pub fn is_encrypted(&self) -> bool {
        self.encrypted.is_some()
    }
}

/// The decoded content of an export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSections {
    pub categories: Vec<CategoryNode>,
    pub clients: Vec<ClientNode>,
    pub tags: Vec<TagNode>,
    pub accounts: Vec<AccountNode>,
}

impl ExportSections {
    /// Build sections from stored records.
    ///
    /// Leading and trailing whitespace of every free-text field (names,
    /// descriptions, login, url, notes) is dropped, because the XML reader
    /// trims text content. An export/import round trip therefore loses it,
    /// e.g. the final newline of a key pasted into `notes`. Whitespace inside
    /// the text is kept.
    #[must_use]
    pub fn from_records(
        categories: &[CategoryRecord],
        clients: &[ClientRecord],
        tags: &[TagRecord],
        accounts: &[AccountRecord],
    ) -> Self {
        Self {
            categories: categories
                .iter()
                .map(|c| CategoryNode {
                    id: c.id,
                    name: c.name.trim().to_owned(),
                    description: c.description.trim().to_owned(),
                })
                .collect(),
            clients: clients
                .iter()
                .map(|c| ClientNode {
                    id: c.id,
                    name: c.name.trim().to_owned(),
                    description: c.description.trim().to_owned(),
                    global: c.is_global,
                })
                .collect(),
            tags: tags
                .iter()
                .map(|t| TagNode {
                    id: t.id,
                    name: t.name.trim().to_owned(),
                })
                .collect(),
            accounts: accounts
                .iter()
                .map(|a| AccountNode {
                    id: a.id,
                    name: a.name.trim().to_owned(),
                    client_id: a.client_id,
                    category_id: a.category_id,
                    login: a.login.trim().to_owned(),
                    url: a.url.trim().to_owned(),
                    notes: a.notes.trim().to_owned(),
                    pass: BASE64.encode(&a.pass),
                    tags: AccountTags {
                        items: a.tag_ids.iter().map(|&id| TagRef { id }).collect(),
                    },
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn counts(&self) -> NodeCounts {
        NodeCounts {
            accounts: self.accounts.len(),
            categories: self.categories.len(),
            clients: self.clients.len(),
            tags: self.tags.len(),
        }
    }

    /// SHA-256 hex digest of the JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Serialization`] if JSON encoding fails.
    pub fn content_hash(&self) -> Result<String, ExportError> {
        let json = serde_json::to_vec(self).map_err(|e| ExportError::Serialization {
            reason: e.to_string(),
        })?;
        Ok(hex::encode(Sha256::digest(&json)))
    }
}

/// Render a complete document.
pub(crate) fn render(
    sections: &ExportSections,
    protection: &ExportProtection,
    time: i64,
) -> Result<String, ExportError> {
    let meta = Meta {
        generator: GENERATOR.to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        time,
        hash: String::new(),
    };

    let categories = CategoriesNode {
        count: sections.categories.len(),
        items: sections.categories.clone(),
    };
    let clients = ClientsNode {
        count: sections.clients.len(),
        items: sections.clients.clone(),
    };
    let tags = TagsNode {
        count: sections.tags.len(),
        items: sections.tags.clone(),
    };
    let accounts = AccountsNode {
        count: sections.accounts.len(),
        items: sections.accounts.clone(),
    };

    let mut document = match protection {
        ExportProtection::Plain => ExportDocument {
            meta,
            categories: Some(categories),
            clients: Some(clients),
            tags: Some(tags),
            accounts: Some(accounts),
            encrypted: None,
        },
        ExportProtection::Encrypted(key) => {
            let data = vec![
                seal_section(key, CATEGORIES, &categories)?,
                seal_section(key, CLIENTS, &clients)?,
                seal_section(key, TAGS, &tags)?,
                seal_section(key, ACCOUNTS, &accounts)?,
            ];
            ExportDocument {
                meta,
                categories: None,
                clients: None,
                tags: None,
                accounts: None,
                encrypted: Some(EncryptedNode {
                    salt: BASE64.encode(key.salt()),
                    data,
                }),
            }
        }
    };
    document.meta.hash = match &document.encrypted {
        Some(encrypted) => sealed_hash(&encrypted.data),
        None => sections.content_hash()?,
    };

    let mut xml = String::from(XML_DECLARATION);
    xml.push_str(&to_xml("Root", &document)?);
    xml.push('\n');
    Ok(xml)
}

/// Parse a document without decrypting it.
pub(crate) fn parse(xml: &str, path: &Path) -> Result<ExportDocument, ExportError> {
    quick_xml::de::from_str(xml).map_err(|e| corrupt(path, format!("invalid document: {e}")))
}

/// Check a parsed document against `Meta/Hash` and decode its sections,
/// decrypting if needed.
pub(crate) fn open(
    document: ExportDocument,
    password: Option<&str>,
    path: &Path,
) -> Result<ExportSections, ExportError> {
    let expected_hash = document.meta.hash.clone();

    match document.encrypted {
        Some(encrypted) => {
            check_hash(&expected_hash, sealed_hash(&encrypted.data), path)?;
            let password = password
                .filter(|p| !p.is_empty())
                .ok_or_else(|| ExportError::PasswordRequired {
                    path: path.to_path_buf(),
                })?;
            let salt = BASE64
                .decode(encrypted.salt.trim())
                .map_err(|e| corrupt(path, format!("invalid salt: {e}")))?;
            let key = ExportKey::derive(password, &salt)
                .map_err(|e| corrupt(path, e.to_string()))?;

            let data = &encrypted.data;
            let categories: CategoriesNode = unseal_section(&key, data, CATEGORIES, path)?;
            let clients: ClientsNode = unseal_section(&key, data, CLIENTS, path)?;
            let tags: TagsNode = unseal_section(&key, data, TAGS, path)?;
            let accounts: AccountsNode = unseal_section(&key, data, ACCOUNTS, path)?;

            Ok(ExportSections {
                categories: counted(categories.count, categories.items, CATEGORIES, path)?,
                clients: counted(clients.count, clients.items, CLIENTS, path)?,
                tags: counted(tags.count, tags.items, TAGS, path)?,
                accounts: counted(accounts.count, accounts.items, ACCOUNTS, path)?,
            })
        }
        None => {
            let categories = require(document.categories, CATEGORIES, path)?;
            let clients = require(document.clients, CLIENTS, path)?;
            let tags = require(document.tags, TAGS, path)?;
            let accounts = require(document.accounts, ACCOUNTS, path)?;
            let sections = ExportSections {
                categories: counted(categories.count, categories.items, CATEGORIES, path)?,
                clients: counted(clients.count, clients.items, CLIENTS, path)?,
                tags: counted(tags.count, tags.items, TAGS, path)?,
                accounts: counted(accounts.count, accounts.items, ACCOUNTS, path)?,
            };
            check_hash(&expected_hash, sections.content_hash()?, path)?;
            Ok(sections)
        }
    }
}

fn check_hash(expected: &str, actual: String, path: &Path) -> Result<(), ExportError> {
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(ExportError::IntegrityMismatch {
            path: path.to_path_buf(),
            expected: expected.to_owned(),
            actual,
        })
    }
}

/// SHA-256 hex digest over each `Data` node name and payload, in order.
fn sealed_hash(data: &[DataNode]) -> String {
    let mut hasher = Sha256::new();
    for node in data {
        hasher.update(node.node.as_bytes());
        hasher.update([0u8]);
        hasher.update(node.payload.trim().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn require<T>(section: Option<T>, name: &str, path: &Path) -> Result<T, ExportError> {
    section.ok_or_else(|| corrupt(path, format!("missing section '{name}'")))
}

/// A section's `count` attribute must match the number of children.
fn counted<T>(
    count: usize,
    items: Vec<T>,
    name: &str,
    path: &Path,
) -> Result<Vec<T>, ExportError> {
    if items.len() == count {
        Ok(items)
    } else {
        Err(corrupt(
            path,
            format!("section '{name}' declares {count} nodes but has {}", items.len()),
        ))
    }
}

fn seal_section<T: Serialize>(
    key: &ExportKey,
    name: &str,
    section: &T,
) -> Result<DataNode, ExportError> {
    let xml = to_xml(name, section)?;
    let sealed = crypto::encrypt(key.key(), xml.as_bytes())?;
    Ok(DataNode {
        node: name.to_owned(),
        payload: BASE64.encode(sealed),
    })
}

fn unseal_section<T: DeserializeOwned>(
    key: &ExportKey,
    data: &[DataNode],
    name: &str,
    path: &Path,
) -> Result<T, ExportError> {
    let node = data
        .iter()
        .find(|d| d.node == name)
        .ok_or_else(|| corrupt(path, format!("missing encrypted section '{name}'")))?;

    let sealed = BASE64
        .decode(node.payload.trim())
        .map_err(|e| corrupt(path, format!("section '{name}' is not base64: {e}")))?;

    let plain = crypto::decrypt(key.key(), &sealed).map_err(|e| match e {
        CryptoError::Decryption { .. } => ExportError::WrongPassword {
            path: path.to_path_buf(),
        },
        other => corrupt(path, format!("section '{name}': {other}")),
    })?;

    let xml = String::from_utf8(plain)
        .map_err(|e| corrupt(path, format!("section '{name}' is not UTF-8: {e}")))?;
    quick_xml::de::from_str(&xml).map_err(|e| corrupt(path, format!("section '{name}': {e}")))
}

fn to_xml<T: Serialize>(root: &str, value: &T) -> Result<String, ExportError> {
    let mut out = String::new();
    let mut serializer = quick_xml::se::Serializer::with_root(&mut out, Some(root)).map_err(
        |e| ExportError::Serialization {
            reason: e.to_string(),
        },
    )?;
    serializer.indent(' ', 2);
    value
        .serialize(serializer)
        .map_err(|e| ExportError::Serialization {
            reason: e.to_string(),
        })?;
    Ok(out)
}

fn corrupt(path: &Path, reason: String) -> ExportError {
    ExportError::Corrupt {
        path: path.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> ExportSections {
        ExportSections::from_records(
            &[CategoryRecord {
                id: 1,
                name: " Servers ".to_owned(),
                description: "prod & staging".to_owned(),
            }],
            &[ClientRecord {
                id: 2,
                name: "Acme <Corp>".to_owned(),
                description: String::new(),
                is_global: true,
            }],
            &[
                TagRecord {
                    id: 3,
                    name: "ssh".to_owned(),
                },
                TagRecord {
                    id: 4,
                    name: "root".to_owned(),
                },
            ],
            &[AccountRecord {
                id: 5,
                name: "db01".to_owned(),
                client_id: 2,
                category_id: 1,
                login: "admin".to_owned(),
                url: "https://db01.example.com/?a=1&b=2".to_owned(),
                notes: "line one\nline two".to_owned(),
                pass: vec![0, 1, 2, 254, 255],
                tag_ids: vec![3, 4],
            }],
        )
    }

    #[test]
    fn from_records_trims_free_text() {
        let sections = sample();
        assert_eq!(sections.categories.first().unwrap().name, "Servers");
    }

    #[test]
    fn round_trip_keeps_inner_whitespace_only() {
        let path = Path::new("test.xml");
        let key = "-----BEGIN KEY-----\n  abc\n-----END KEY-----";
        let sections = ExportSections::from_records(
            &[],
            &[],
            &[],
            &[AccountRecord {
                id: 1,
                name: "vpn".to_owned(),
                client_id: 1,
                category_id: 1,
                login: String::new(),
                url: String::new(),
                notes: format!("\n{key}\n"),
                pass: vec![1],
                tag_ids: vec![],
            }],
        );
        let xml = render(&sections, &ExportProtection::Plain, 0).unwrap();
        let reopened = open(parse(&xml, path).unwrap(), None, path).unwrap();
        assert_eq!(reopened.accounts.first().unwrap().notes, key);
    }

    #[test]
    fn plain_document_reopens_with_same_sections() {
        let path = Path::new("test.xml");
        let sections = sample();
        let xml = render(&sections, &ExportProtection::Plain, 1_700_000_000).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<Categories count=\"1\">"));

        let document = parse(&xml, path).unwrap();
        assert!(!document.is_encrypted());
        assert_eq!(document.meta.generator, GENERATOR);
        assert_eq!(document.meta.time, 1_700_000_000);
        assert_eq!(open(document, None, path).unwrap(), sections);
    }

    #[test]
    fn encrypted_document_hides_sections() {
        let path = Path::new("test.xml");
        let sections = sample();
        let protection = ExportProtection::from_password(Some("s3cret")).unwrap();
        let xml = render(&sections, &protection, 0).unwrap();
        assert!(!xml.contains("db01"));
        assert!(xml.contains("<Encrypted"));

        let document = parse(&xml, path).unwrap();
        assert!(document.is_encrypted());
        assert_eq!(open(document, Some("s3cret"), path).unwrap(), sections);
    }

    #[test]
    fn encrypted_hash_covers_ciphertext_only() {
        let path = Path::new("test.xml");
        let sections = sample();
        let protection = ExportProtection::from_password(Some("s3cret")).unwrap();
        let xml = render(&sections, &protection, 0).unwrap();
        assert!(!xml.contains(&sections.content_hash().unwrap()));

        let document = parse(&xml, path).unwrap();
        let tampered = xml.replace(&document.meta.hash, &"0".repeat(64));
        assert_ne!(xml, tampered);
        assert!(matches!(
            open(parse(&tampered, path).unwrap(), Some("s3cret"), path),
            Err(ExportError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn encrypted_document_without_password_is_rejected() {
        let path = Path::new("test.xml");
        let protection = ExportProtection::from_password(Some("s3cret")).unwrap();
        let xml = render(&sample(), &protection, 0).unwrap();

        let document = parse(&xml, path).unwrap();
        assert!(matches!(
            open(document.clone(), None, path),
            Err(ExportError::PasswordRequired { .. })
        ));
        assert!(matches!(
            open(document, Some("wrong"), path),
            Err(ExportError::WrongPassword { .. })
        ));
    }

    #[test]
    fn tampered_hash_is_detected() {
        let path = Path::new("test.xml");
        let sections = sample();
        let xml = render(&sections, &ExportProtection::Plain, 0).unwrap();
        let hash = sections.content_hash().unwrap();
        let tampered = xml.replace(&hash, &"0".repeat(64));

        let document = parse(&tampered, path).unwrap();
        assert!(matches!(
            open(document, None, path),
            Err(ExportError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn missing_meta_is_corrupt() {
        let path = Path::new("test.xml");
        let result = parse("<Root><Categories/></Root>", path);
        assert!(matches!(result, Err(ExportError::Corrupt { .. })));
    }

    #[test]
    fn not_xml_is_corrupt() {
        let result = parse("this is not xml", Path::new("x"));
        assert!(matches!(result, Err(ExportError::Corrupt { .. })));
    }

    #[test]
    fn missing_section_is_corrupt() {
        let path = Path::new("test.xml");
        let sections = ExportSections::default();
        let xml = format!(
            "<Root><Meta><Generator>passvault</Generator><Version>0</Version>\
             <Time>0</Time><Hash>{}</Hash></Meta><Categories count=\"0\"/></Root>",
            sections.content_hash().unwrap()
        );
        let document = parse(&xml, path).unwrap();
        assert!(matches!(
            open(document, None, path),
            Err(ExportError::Corrupt { .. })
        ));
    }

    #[test]
    fn count_attribute_must_match_children() {
        let path = Path::new("test.xml");
        let sections = sample();
        let xml = render(&sections, &ExportProtection::Plain, 0).unwrap();
        let tampered = xml.replace("<Tags count=\"2\">", "<Tags count=\"3\">");
        assert_ne!(xml, tampered);

        let document = parse(&tampered, path).unwrap();
        assert!(matches!(
            open(document, None, path),
            Err(ExportError::Corrupt { .. })
        ));
    }

    #[test]
    fn counts_per_section() {
        let counts = sample().counts();
        assert_eq!(
            counts,
            NodeCounts {
                accounts: 1,
                categories: 1,
                clients: 1,
                tags: 2
            }
        );
    }
}
