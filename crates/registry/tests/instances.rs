use std::collections::HashMap;
use std::sync::Arc;

use appsearch_core_types::{prefixed_schema, CallerIdentity, PackageIdentifier, UserHandle};
use appsearch_registry::{
    Document, InstanceOptions, MemoryEngineFactory, SchemaType, SearchSpec, SetSchemaRequest,
    UserInstanceRegistry,
};
use visibility_checker::{Permission, PermissionOracle, SchemaVisibility, VisibilityConfig};

const OWNER: &str = "com.example.notes";
const FRIEND: &str = "com.example.launcher";
const FRIEND_CERT: &[u8] = b"launcher-cert";

struct SignedFriend;

impl PermissionOracle for SignedFriend {
    fn has_signing_certificate(&self, _user: UserHandle, package: &str, cert: &[u8]) -> bool {
        package == FRIEND && cert == FRIEND_CERT
    }

    fn holds_permission(&self, _: UserHandle, _: &CallerIdentity, _: Permission) -> bool {
        false
    }

    fn can_package_query(&self, _: UserHandle, _: &str, _: &str) -> bool {
        false
    }

    fn has_managed_profile_contacts_access(&self, _: UserHandle, _: &CallerIdentity) -> bool {
        false
    }
}

fn registry(factory: Arc<MemoryEngineFactory>) -> UserInstanceRegistry {
    UserInstanceRegistry::new(
        factory,
        Arc::new(SignedFriend),
        InstanceOptions {
            recent_calls_capacity: 8,
        },
    )
}

fn shared_notes_request() -> SetSchemaRequest {
    let mut visibility = HashMap::new();
    visibility.insert(
        "Note".to_string(),
        SchemaVisibility::new(
            VisibilityConfig::default()
                .allow_package(PackageIdentifier::new(FRIEND, FRIEND_CERT.to_vec())),
        ),
    );
    SetSchemaRequest {
        schemas: vec![SchemaType::new("Note"), SchemaType::new("Draft")],
        visibility,
        ..SetSchemaRequest::default()
    }
}

#[test]
fn stored_visibility_drives_cross_package_access() {
    let registry = registry(Arc::new(MemoryEngineFactory::new()));
    let instance = registry.get_or_create(UserHandle::of(0)).unwrap();
    instance
        .engine()
        .set_schema(OWNER, "db", shared_notes_request())
        .unwrap();

    let friend = CallerIdentity::new(FRIEND, 10_050, false);
    let stranger = CallerIdentity::new("com.example.other", 10_051, false);
    let owner = CallerIdentity::new(OWNER, 10_052, false);
    let note = prefixed_schema(OWNER, "db", "Note");
    let draft = prefixed_schema(OWNER, "db", "Draft");

    assert!(instance.is_visible(&friend, OWNER, &note));
    assert!(!instance.is_visible(&friend, OWNER, &draft));
    assert!(!instance.is_visible(&stranger, OWNER, &note));
    assert!(instance.is_visible(&owner, OWNER, &draft));
    assert!(!instance.is_visible(&owner.clone().for_enterprise(), OWNER, &draft));
}

#[test]
fn data_survives_a_lock_unlock_cycle() {
    let factory = Arc::new(MemoryEngineFactory::new());
    let registry = registry(Arc::clone(&factory));
    let user = UserHandle::of(10);

    let instance = registry.get_or_create(user).unwrap();
    instance
        .engine()
        .set_schema(OWNER, "db", shared_notes_request())
        .unwrap();
    instance
        .engine()
        .put_document(
            OWNER,
            "db",
            Document::new("personal", "n1", "Note").with_property("title", "groceries"),
        )
        .unwrap();
    drop(instance);

    assert!(registry.close_and_remove(user));
    assert!(registry.get(user).is_err());

    let reopened = registry.get_or_create(user).unwrap();
    let hits = reopened
        .engine()
        .query(OWNER, "db", &SearchSpec::new("groceries"))
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(factory.open_count(user), 2);
    assert!(reopened.stats().recent().is_empty());
}
