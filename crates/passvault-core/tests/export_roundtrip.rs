//! Export → verify → import against the in-memory store.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use passvault_core::archive::GzipArchiver;
use passvault_core::error::ExportError;
use passvault_core::events::EventDispatcher;
use passvault_core::export::{
    ExportProtection, NodeCounts, XmlExportService, XmlImportService, XmlVerifyService,
};
use passvault_storage::{CatalogRepository, MemoryStore, NewAccount};

async fn seeded_catalog() -> MemoryStore {
    let store = MemoryStore::new();
    let servers = store.insert_category("Servers", "racks").await.unwrap();
    let web = store.insert_category("Web", "").await.unwrap();
    let acme = store.insert_client("Acme", "main client", false).await.unwrap();
    store.insert_client("Internal", "", true).await.unwrap();
    let ssh = store.insert_tag("ssh").await.unwrap();
    let prod = store.insert_tag("prod").await.unwrap();

    store
        .insert_account(&NewAccount {
            name: "db01".to_owned(),
            client_id: acme,
            category_id: servers,
            login: "root".to_owned(),
            url: "ssh://db01".to_owned(),
            notes: "primary".to_owned(),
            pass: vec![1, 2, 3, 4, 5, 6],
            tag_ids: vec![ssh, prod],
        })
        .await
        .unwrap();
    store
        .insert_account(&NewAccount {
            name: "portal".to_owned(),
            client_id: acme,
            category_id: web,
            login: "admin".to_owned(),
            url: "https://portal.example.com/login?next=/&x=1".to_owned(),
            notes: String::new(),
            pass: vec![9; 40],
            tag_ids: vec![],
        })
        .await
        .unwrap();
    store
}

fn exporter(store: &MemoryStore) -> XmlExportService {
    XmlExportService::new(
        Arc::new(store.clone()),
        Arc::new(GzipArchiver::default()),
        Arc::new(EventDispatcher::new()),
        "passvault",
    )
}

const EXPECTED: NodeCounts = NodeCounts {
    accounts: 2,
    categories: 2,
    clients: 2,
    tags: 2,
};

#[tokio::test]
async fn plain_export_verifies_with_row_counts() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_catalog().await;

    let outcome = exporter(&store)
        .export(dir.path(), &ExportProtection::Plain)
        .await
        .unwrap();
    assert_eq!(outcome.counts, EXPECTED);

    let result = XmlVerifyService::new(Arc::new(EventDispatcher::new()))
        .verify(&outcome.file.path(), None)
        .await
        .unwrap();
    assert!(!result.encrypted);
    assert_eq!(result.counts, EXPECTED);
    assert_eq!(result.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn encrypted_export_needs_the_same_password() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_catalog().await;
    let protection = ExportProtection::from_password(Some("correct horse")).unwrap();

    let outcome = exporter(&store)
        .export(dir.path(), &protection)
        .await
        .unwrap();
    assert!(outcome.encrypted);

    let xml = tokio::fs::read_to_string(outcome.file.path()).await.unwrap();
    assert!(!xml.contains("portal"));

    let verifier = XmlVerifyService::new(Arc::new(EventDispatcher::new()));
    let result = verifier
        .verify(&outcome.file.path(), Some("correct horse"))
        .await
        .unwrap();
    assert!(result.encrypted);
    assert_eq!(result.counts, EXPECTED);

    assert!(matches!(
        verifier
            .verify(&outcome.file.path(), Some("battery staple"))
            .await,
        Err(ExportError::WrongPassword { .. })
    ));
    assert!(matches!(
        verifier.verify(&outcome.file.path(), None).await,
        Err(ExportError::PasswordRequired { .. })
    ));
}

#[tokio::test]
async fn empty_catalog_exports_and_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();

    let outcome = exporter(&store)
        .export(dir.path(), &ExportProtection::Plain)
        .await
        .unwrap();
    let result = XmlVerifyService::new(Arc::new(EventDispatcher::new()))
        .verify(&outcome.file.path(), None)
        .await
        .unwrap();
    assert_eq!(result.counts, NodeCounts::default());
}

#[tokio::test]
async fn import_into_empty_catalog_recreates_rows() {
    let dir = tempfile::tempdir().unwrap();
    let source = seeded_catalog().await;
    let protection = ExportProtection::from_password(Some("pw")).unwrap();
    let outcome = exporter(&source)
        .export(dir.path(), &protection)
        .await
        .unwrap();

    let target = MemoryStore::new();
    let summary = XmlImportService::new(Arc::new(target.clone()), Arc::new(EventDispatcher::new()))
        .import(&outcome.file.path(), Some("pw"))
        .await
        .unwrap();

    assert_eq!(summary.created, EXPECTED);
    assert_eq!(summary.reused, NodeCounts::default());

    let accounts = target.accounts().await.unwrap();
    let db01 = accounts.iter().find(|a| a.name == "db01").unwrap();
    assert_eq!(db01.pass, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(db01.tag_ids.len(), 2);

    let categories = target.categories().await.unwrap();
    let servers = categories.iter().find(|c| c.name == "Servers").unwrap();
    assert_eq!(db01.category_id, servers.id);
}

#[tokio::test]
async fn import_reuses_existing_names_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    let source = seeded_catalog().await;
    let outcome = exporter(&source)
        .export(dir.path(), &ExportProtection::Plain)
        .await
        .unwrap();

    let target = MemoryStore::new();
    target.insert_category("SERVERS", "").await.unwrap();
    target.insert_tag("Ssh").await.unwrap();

    let summary = XmlImportService::new(Arc::new(target.clone()), Arc::new(EventDispatcher::new()))
        .import(&outcome.file.path(), None)
        .await
        .unwrap();

    assert_eq!(summary.reused.categories, 1);
    assert_eq!(summary.created.categories, 1);
    assert_eq!(summary.reused.tags, 1);
    assert_eq!(summary.created.accounts, 2);
    assert_eq!(target.categories().await.unwrap().len(), 2);
}

#[tokio::test]
async fn dangling_account_reference_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dangling.xml");

    // Valid hash over a document whose only account points at category 99.
    let sections = passvault_core::export::ExportSections {
        categories: vec![],
        clients: vec![passvault_core::export::ClientNode {
            id: 1,
            name: "Acme".to_owned(),
            description: String::new(),
            global: false,
        }],
        tags: vec![],
        accounts: vec![passvault_core::export::AccountNode {
            id: 1,
            name: "orphan".to_owned(),
            client_id: 1,
            category_id: 99,
            login: String::new(),
            url: String::new(),
            notes: String::new(),
            pass: "AQID".to_owned(),
            tags: passvault_core::export::AccountTags::default(),
        }],
    };
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Root>\
         <Meta><Generator>passvault</Generator><Version>0.1.0</Version>\
         <Time>0</Time><Hash>{}</Hash></Meta>\
         <Categories count=\"0\"/>\
         <Clients count=\"1\"><Client id=\"1\"><name>Acme</name><description/><global>false</global></Client></Clients>\
         <Tags count=\"0\"/>\
         <Accounts count=\"1\"><Account id=\"1\"><name>orphan</name><clientId>1</clientId>\
         <categoryId>99</categoryId><login/><url/><notes/><pass>AQID</pass><tags/></Account></Accounts>\
         </Root>",
        sections.content_hash().unwrap()
    );
    tokio::fs::write(&path, xml).await.unwrap();

    let target = MemoryStore::new();
    let result = XmlImportService::new(Arc::new(target.clone()), Arc::new(EventDispatcher::new()))
        .import(&path, None)
        .await;
    assert!(matches!(result, Err(ExportError::Corrupt { .. })));
    assert!(target.clients().await.unwrap().is_empty());
}
