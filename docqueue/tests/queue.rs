use async_trait::async_trait;
use bson::{Bson, Document, doc};
use docqueue::{
    memory::{MemoryConnection, MemoryConnectionBuilder},
    prelude::*,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    #[serde(rename = "_id")]
    id: i64,
    name: String,
    active: bool,
    #[serde(default)]
    roles: Vec<String>,
    version: String,
}

impl Record for User {
    fn collection_name() -> &'static str {
        "users"
    }
}

/// `""` adds `active`, `"1"` renames `login` to `name`, `"2"` is current.
fn user_migrations() -> Vec<MigrationRef> {
    vec![
        Box::new(FnMigration::new("", |doc: &mut Document, next: &str| {
            doc.insert("active", true);
            set_version(doc, next);
        })),
        Box::new(FnMigration::new("1", |doc: &mut Document, next: &str| {
            if let Some(login) = doc.remove("login") {
                doc.insert("name", login);
            }
            set_version(doc, next);
        })),
        Box::new(FnMigration::new("2", |_: &mut Document, _: &str| {})),
    ]
}

async fn running(registry: MigrationRegistry, store: &MemoryConnection) -> DbQueue {
    let queue = DbQueue::builder()
        .capacity(8)
        .migrations(registry)
        .build()
        .unwrap();
    queue
        .attach(MemoryConnectionBuilder::new().sharing(store))
        .await
        .unwrap();
    queue.run().await;
    queue
}

async fn seeded_store() -> MemoryConnection {
    let store = MemoryConnection::new();
    store
        .insert("users", doc! { "_id": 1i64, "login": "alice" })
        .await
        .unwrap();
    store
        .insert("users", doc! { "_id": 2i64, "login": "bob", "active": false, "version": "1" })
        .await
        .unwrap();
    store
        .insert("users", doc! { "_id": 3i64, "name": "carol", "active": true, "version": "2" })
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn reads_return_every_version_in_the_latest_shape() {
    let store = seeded_store().await;
    let registry = MigrationRegistry::builder()
        .register("users", user_migrations())
        .build()
        .unwrap();
    let queue = running(registry, &store).await;

    let users: Vec<User> = queue.find_as("users", Query::new()).await.unwrap();

    let names: Vec<_> = users.iter().map(|user| user.name.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob", "carol"]);
    assert!(users.iter().all(|user| user.version == "2"));
    assert!(!users[1].active);

    // Nothing is written back; the next read migrates again.
    assert!(store.documents("users").await[0].get("version").is_none());

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn filters_apply_to_the_stored_shape() {
    let store = seeded_store().await;
    let registry = MigrationRegistry::builder()
        .register("users", user_migrations())
        .build()
        .unwrap();
    let queue = running(registry, &store).await;

    let err = queue
        .find_one("users", Filter::eq("name", "alice"))
        .await
        .unwrap_err();
    assert_eq!(err, DocQueueError::NotFound("users".into()));

    let alice = queue
        .find_one("users", Filter::regex("login", "^ali"))
        .await
        .unwrap();
    assert_eq!(alice.get_str("name").unwrap(), "alice");

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn failing_dependencies_are_logged_unless_propagated() {
    let chain = || -> Vec<MigrationRef> {
        vec![
            Box::new(
                FnMigration::new("", |doc: &mut Document, next: &str| set_version(doc, next))
                    .with_dependency(|id: &Bson| {
                        Err(DocQueueError::Driver(format!("cannot notify {id}")))
                    }),
            ),
            Box::new(FnMigration::new("1", |doc: &mut Document, next: &str| set_version(doc, next))),
            Box::new(FnMigration::new("2", |_: &mut Document, _: &str| {})),
        ]
    };
    let store = MemoryConnection::new();
    store.insert("users", doc! { "_id": 7 }).await.unwrap();

    let logging = running(
        MigrationRegistry::builder().register("users", chain()).build().unwrap(),
        &store,
    )
    .await;
    let document = logging.find_one("users", Query::new()).await.unwrap();
    assert_eq!(document.get_str("version").unwrap(), "1");
    logging.shutdown().await.unwrap();

    let propagating = DbQueue::builder()
        .dependency_failure(DependencyFailure::Propagate)
        .migrations(MigrationRegistry::builder().register("users", chain()).build().unwrap())
        .build()
        .unwrap();
    propagating.attach_connection(store.clone()).await;
    propagating.run().await;

    let err = propagating.find_one("users", Query::new()).await.unwrap_err();
    assert!(matches!(err, DocQueueError::MigrationDependency { ref id, .. } if id == "7"));
    propagating.shutdown().await.unwrap();
}

/// Records every migrated id in an `audit` collection through the worker's connection.
struct AuditedMigration;

#[async_trait]
impl Migration for AuditedMigration {
    fn version(&self) -> &str {
        ""
    }

    fn transform(&self, document: &mut Document, next: &str) {
        set_version(document, next);
    }

    async fn dependency(&self, id: &Bson, connection: &dyn Connection) -> DocQueueResult<()> {
        connection
            .insert("audit", doc! { "user": id.clone() })
            .await
    }
}

#[tokio::test]
async fn dependencies_run_on_the_worker_connection() {
    let store = MemoryConnection::new();
    store.insert("orders", doc! { "_id": 1i64 }).await.unwrap();
    store.insert("orders", doc! { "_id": 2i64 }).await.unwrap();
    let registry = MigrationRegistry::builder()
        .register(
            "orders",
            vec![
                Box::new(AuditedMigration),
                Box::new(FnMigration::new("1", |_: &mut Document, _: &str| {})),
            ],
        )
        .build()
        .unwrap();
    let queue = running(registry, &store).await;

    assert_eq!(queue.find("orders", Query::new()).await.unwrap().len(), 2);
    assert_eq!(queue.count("audit", Query::new()).await.unwrap(), 2);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn typed_collections_round_trip_records() {
    let store = MemoryConnection::new();
    let queue = running(MigrationRegistry::new(), &store).await;
    let users = queue.typed::<User>();
    let dave = User {
        id: 4,
        name: "dave".into(),
        active: true,
        roles: vec!["guest".into()],
        version: "2".into(),
    };

    users.insert(&dave).await.unwrap();
    assert_eq!(users.find_one(Filter::eq("_id", 4i64)).await.unwrap(), dave);
    assert_eq!(users.count(Query::new()).await.unwrap(), 1);

    queue.insert("users", doc! { "_id": 5i64, "name": 12 }).await.unwrap();
    assert!(matches!(
        users.find_one(Filter::eq("_id", 5i64)).await,
        Err(DocQueueError::Serialization(_))
    ));

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn update_helpers_modify_the_stored_document() {
    let store = MemoryConnection::new();
    store
        .insert("users", doc! { "_id": 1i64, "name": "alice", "roles": ["guest"] })
        .await
        .unwrap();
    let queue = running(MigrationRegistry::new(), &store).await;

    queue.update_set("users", 1i64, "name", "alicia").await.unwrap();
    queue.update_add("users", 1i64, "roles", "admin").await.unwrap();
    queue.update_add("users", 1i64, "roles", "admin").await.unwrap();
    queue.update_remove("users", 1i64, "roles", "guest").await.unwrap();

    let mut request = UpdateRequest::with_prefix("profile.");
    request.set("theme", "dark").set_updated();
    queue.apply("users", 1i64, &request).await.unwrap();
    queue
        .update_where("users", Filter::eq("name", "alicia"), doc! { "$set": { "active": true } })
        .await
        .unwrap();

    let stored = queue.collection("users").find_one(Query::new()).await.unwrap();
    assert_eq!(stored.get_str("name").unwrap(), "alicia");
    assert_eq!(stored.get_array("roles").unwrap(), &vec![Bson::from("admin")]);
    assert_eq!(stored.get_document("profile").unwrap().get_str("theme").unwrap(), "dark");
    assert!(stored.get_bool("active").unwrap());

    assert!(matches!(
        queue.update_set("users", 99i64, "name", "nobody").await,
        Err(DocQueueError::Driver(_))
    ));

    queue.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_share_one_store() {
    let store = MemoryConnection::new();
    let queue = DbQueue::builder().capacity(4).build().unwrap();
    for _ in 0..4 {
        queue
            .attach(MemoryConnectionBuilder::new().sharing(&store))
            .await
            .unwrap();
    }
    queue.run().await;
    let queue = Arc::new(queue);

    let tasks: Vec<_> = (0..100)
        .map(|n| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.insert("events", doc! { "n": n }).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(queue.workers().await, 4);
    assert_eq!(queue.count("events", Query::new()).await.unwrap(), 100);
    assert_eq!(queue.count("events", Filter::lt("n", 10)).await.unwrap(), 10);
}

#[derive(Debug)]
struct Unavailable;

#[async_trait]
impl Connection for Unavailable {
    async fn count(&self, _collection: &str, _query: &Query) -> DocQueueResult<u64> {
        Err(DocQueueError::Driver("server selection timed out".into()))
    }

    async fn find_one(&self, _collection: &str, _query: &Query) -> DocQueueResult<Option<Document>> {
        Err(DocQueueError::Driver("server selection timed out".into()))
    }

    async fn find(&self, _collection: &str, _query: &Query) -> DocQueueResult<Vec<Document>> {
        Err(DocQueueError::Driver("server selection timed out".into()))
    }

    async fn insert(&self, _collection: &str, _document: Document) -> DocQueueResult<()> {
        Err(DocQueueError::Driver("server selection timed out".into()))
    }

    async fn update_id(&self, _collection: &str, _id: &Bson, _update: Document) -> DocQueueResult<()> {
        Err(DocQueueError::Driver("server selection timed out".into()))
    }

    async fn update(&self, _collection: &str, _query: &Query, _update: Document) -> DocQueueResult<()> {
        Err(DocQueueError::Driver("server selection timed out".into()))
    }
}

#[tokio::test]
async fn driver_errors_pass_through_unchanged() {
    let queue = DbQueue::builder().build().unwrap();
    queue.attach_connection(Unavailable).await;
    queue.run().await;

    let expected = DocQueueError::Driver("server selection timed out".into());
    assert_eq!(queue.find("users", Query::new()).await.unwrap_err(), expected);
    assert_eq!(queue.insert("users", doc! {}).await.unwrap_err(), expected);

    queue.shutdown().await.unwrap();
}
