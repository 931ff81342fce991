use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use dealer_approvals::authz::{CurrentUser, Role};
use dealer_approvals::errors::AppError;
use dealer_approvals::events::init_event_bus;
use dealer_approvals::geo::{GeoDirectory, GeographicScope};
use dealer_approvals::notifications::{
    ApproverDirectory, InAppTransport, NotificationDispatcher, NotificationKind, NotificationPayload,
    StaticUserDirectory,
};
use dealer_approvals::store::{collections, DocumentStore, MemoryStore, Query};

#[tokio::test]
async fn in_app_delivery_reaches_the_event_bus() -> Result<()> {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let (bus, mut rx) = init_event_bus();
    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&store),
        Arc::new(InAppTransport::new(bus)),
        Duration::from_millis(500),
    );

    let recipients = BTreeSet::from(["managerY".to_string(), "managerW".to_string()]);
    let payload = NotificationPayload::new(NotificationKind::ApprovalRequired, "Approval required", "expense EXP-1")
        .with_link("/approvals/req-1");
    let (stored, handle) = dispatcher.notify(&recipients, &payload).await;
    assert_eq!(stored.len(), 2);
    handle.context("delivery task not spawned")?.await?;

    let mut delivered = BTreeSet::new();
    for _ in 0..2 {
        let event: Value = rx.recv().await?;
        assert_eq!(event["name"], "notification.delivered");
        delivered.insert(event["payload"]["new"]["userId"].as_str().unwrap_or_default().to_string());
    }
    assert_eq!(delivered, recipients);

    let docs = store.query(&Query::collection(collections::USER_NOTIFICATIONS)).await?;
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|d| d["type"] == "approval_required" && d["read"] == false));
    Ok(())
}

#[tokio::test]
async fn inbox_and_read_flags() -> Result<()> {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let (bus, _) = init_event_bus();
    let dispatcher = NotificationDispatcher::new(store, Arc::new(InAppTransport::new(bus)), Duration::from_millis(500));
    let user = CurrentUser::new("userX", Role::Staff, "0452", "nakhon-ratchasima");
    let someone_else = CurrentUser::new("userQ", Role::Staff, "0452", "nakhon-ratchasima");

    let only_x = BTreeSet::from([user.id.clone()]);
    for title in ["first", "second", "third"] {
        dispatcher
            .notify(&only_x, &NotificationPayload::new(NotificationKind::ApprovalApproved, title, ""))
            .await;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let inbox = dispatcher.list_for_user(&user.id, 10).await?;
    assert_eq!(inbox.iter().map(|n| n.title.as_str()).collect::<Vec<_>>(), vec!["third", "second", "first"]);
    assert_eq!(dispatcher.list_for_user(&user.id, 2).await?.len(), 2);
    assert_eq!(dispatcher.unread_count(&user.id).await?, 3);

    let err = dispatcher.mark_read(&someone_else, &inbox[0].id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let read = dispatcher.mark_read(&user, &inbox[0].id).await?;
    assert!(read.read);
    assert_eq!(dispatcher.unread_count(&user.id).await?, 2);

    let err = dispatcher.mark_read(&user, "missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn directory_matches_role_and_branch_scope() -> Result<()> {
    let scope = Arc::new(GeographicScope::new(GeoDirectory::dealership_default()));
    let json = r#"[
        { "id": "managerY", "role": "BRANCH_MANAGER", "homeBranch": "0452", "homeProvince": "nakhon-ratchasima" },
        { "id": "managerZ", "role": "BRANCH_MANAGER", "homeBranch": "0401", "homeProvince": "khon-kaen" },
        { "id": "pm-1", "role": "PROVINCE_MANAGER", "homeBranch": "0450", "homeProvince": "nakhon-ratchasima",
          "allowedBranches": ["0450", "0451", "0452", "0453"] },
        { "id": "roaming", "role": "BRANCH_MANAGER", "homeBranch": "0101", "homeProvince": "bangkok",
          "allowedBranches": ["0101", "0452"] }
    ]"#;
    let directory = StaticUserDirectory::from_json(json, scope)?;
    assert_eq!(directory.users().len(), 4);

    let managers = directory.approvers_for(Role::BranchManager, "0452").await?;
    assert_eq!(managers, BTreeSet::from(["managerY".to_string(), "roaming".to_string()]));

    let province = directory.approvers_for(Role::ProvinceManager, "0452").await?;
    assert_eq!(province, BTreeSet::from(["pm-1".to_string()]));

    assert!(directory.approvers_for(Role::Accountant, "0452").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn malformed_directory_names_the_offending_entry() {
    let scope = Arc::new(GeographicScope::new(GeoDirectory::dealership_default()));
    let json = r#"[{ "id": "x", "role": "WIZARD", "homeBranch": "0452", "homeProvince": "bangkok" }]"#;

    let err = StaticUserDirectory::from_json(json, scope).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("[0].role"), "unexpected message: {message}");
}
