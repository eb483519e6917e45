//! Integration tests for activerow
//!
//! Every test opens its own in-memory SQLite database with a small library
//! schema: authors, books (belonging to authors), tags, and a `book_tag`
//! junction linking books and tags.
//!
//! Set `RUST_LOG=activerow=debug` to see executed statements.

use std::cell::Cell;
use std::rc::Rc;

use activerow::{
    Comparison, Database, Direction, Entity, EntityClass, Error, Field, FilterValue, QueryBuilder,
    QueryClass, Record, Result, Session, SessionConfig, SqliteDatabase, Value,
};
use tracing_subscriber::EnvFilter;

const FIXTURE: &[&str] = &[
    "CREATE TABLE author (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        created_at DATETIME,
        updated_at DATETIME
    )",
    "CREATE TABLE book (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL DEFAULT '',
        pages INTEGER DEFAULT 0,
        published BOOLEAN DEFAULT 0,
        author_id INTEGER
    )",
    "CREATE TABLE tag (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT
    )",
    "CREATE TABLE book_tag (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        book_id INTEGER,
        tag_id INTEGER
    )",
];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Session over a fresh in-memory library database
fn library_with(config: SessionConfig) -> Session {
    init_tracing();

    let mut db = SqliteDatabase::connect("sqlite::memory:").expect("Should open in-memory database");
    for ddl in FIXTURE {
        db.execute(ddl, &[]).expect("Should create fixture table");
    }
    Session::with_database(Box::new(db), config)
}

fn library() -> Session {
    library_with(
        SessionConfig::builder("sqlite::memory:")
            .query_logging(true)
            .build(),
    )
}

fn author(session: &Session, name: &str) -> Entity {
    let author = session
        .create("author", Record::new().with("name", name))
        .expect("Should create author");
    author.save().expect("Should save author");
    author
}

fn book(session: &Session, title: &str) -> Entity {
    let book = session
        .create("book", Record::new().with("title", title))
        .expect("Should create book");
    book.save().expect("Should save book");
    book
}

fn titles(books: &activerow::EntitySet) -> Vec<String> {
    books
        .iter()
        .map(|b| b.value("title").expect("title").to_string())
        .collect()
}

// ==================== Entity Tests ====================

#[test]
fn test_round_trip() {
    let session = library();

    let created = session
        .create(
            "book",
            Record::new()
                .with("title", "The Left Hand of Darkness")
                .with("pages", "304")
                .with("published", true),
        )
        .expect("Should create book");
    assert!(created.is_new());
    created.save().expect("Should save book");

    let id = created.id().expect("Should assign id");
    session.clear_cache();

    let found = session
        .query("book")
        .filter_by_id(id)
        .find_one()
        .expect("Should query")
        .expect("Should find book");

    assert!(!found.ptr_eq(&created));
    assert_eq!(found.id(), Some(id));
    assert_eq!(found.value("title").unwrap(), Value::from("The Left Hand of Darkness"));
    assert_eq!(found.value("pages").unwrap(), Value::Integer(304));
    assert_eq!(found.value("published").unwrap(), Value::Bool(true));
    assert!(!found.is_modified());
}

#[test]
fn test_defaults_and_timestamps() {
    let session = library();

    let book = session.create("book", Record::new()).unwrap();
    assert_eq!(book.value("title").unwrap(), Value::from(""));
    assert_eq!(book.value("pages").unwrap(), Value::Integer(0));
    assert_eq!(book.value("published").unwrap(), Value::Bool(false));

    let ursula = author(&session, "Ursula");
    assert!(matches!(ursula.value("created_at").unwrap(), Value::DateTime(_)));
    assert!(matches!(ursula.value("updated_at").unwrap(), Value::DateTime(_)));
}

#[test]
fn test_camel_case_names_are_normalized() {
    let session = library();
    let book = session
        .create("book", Record::new().with("authorId", Value::Null))
        .unwrap();

    book.set("pageCount", 1).unwrap_err();
    book.set("Pages", 12).unwrap();
    assert_eq!(book.value("pages").unwrap(), Value::Integer(12));
}

#[test]
fn test_unknown_column() {
    let session = library();

    let err = session
        .create("book", Record::new().with("isbn", "123"))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownColumn { ref column, .. } if column == "isbn"));

    let book = book(&session, "Lavinia");
    assert!(matches!(book.get("isbn"), Err(Error::UnknownColumn { .. })));
    assert!(!book.has("isbn").unwrap());
    assert!(book.has("author").unwrap());
}

#[test]
fn test_unknown_table() {
    let session = library();
    let err = session.create("publisher", Record::new()).unwrap_err();
    assert!(matches!(err, Error::UnknownTable(ref t) if t == "publisher"));
}

#[test]
fn test_invalid_value() {
    let session = library();
    let book = session.create("book", Record::new()).unwrap();
    let err = book.set("pages", "many").unwrap_err();
    assert!(matches!(err, Error::InvalidValue { ref column, .. } if column == "pages"));
}

#[test]
fn test_modification_tracking() {
    let session = library();
    let book = book(&session, "Always Coming Home");
    assert!(!book.is_modified());

    book.set("title", "Always Coming Home").unwrap();
    assert!(!book.is_modified());

    book.set("title", "The Lathe of Heaven").unwrap();
    assert!(book.is_modified());

    book.save().unwrap();
    assert!(!book.is_modified());

    book.unset("title").unwrap();
    assert_eq!(book.value("title").unwrap(), Value::from(""));
    assert!(book.is_modified());
}

#[test]
fn test_noop_save_issues_no_writes() {
    let session = library();
    let book = book(&session, "Tehanu");

    let before = session.total_queries();
    book.save().unwrap();
    book.save().unwrap();
    assert_eq!(session.total_queries(), before);

    book.set("pages", 252).unwrap();
    book.save().unwrap();
    assert_eq!(session.total_queries(), before + 1);

    let last = session.last_queries(1);
    assert!(last[0].sql.starts_with("UPDATE \"book\""));
}

#[test]
fn test_persisted_id_is_immutable() {
    let session = library();
    let book = book(&session, "Orsinian Tales");
    let id = book.id().unwrap();

    book.set("id", id).unwrap();
    assert!(matches!(book.set("id", id + 1), Err(Error::InvalidValue { .. })));
}

#[test]
fn test_delete_evicts_and_removes_row() {
    let session = library();
    let book = book(&session, "Voices");
    let id = book.id().unwrap();
    let cached = session.cache_len();

    book.delete().unwrap();

    assert_eq!(session.cache_len(), cached - 1);
    assert!(session.query("book").filter_by_id(id).find_one().unwrap().is_none());
}

#[test]
fn test_to_json_includes_virtual_columns() {
    let session = library();
    let ursula = author(&session, "Ursula");
    book(&session, "Powers").set("author", &ursula).unwrap();
    ursula.save().unwrap();

    let found = session
        .query("author")
        .alias("a")
        .with_column("SELECT COUNT(*) FROM book WHERE book.author_id = a.id", "book_count")
        .find_one()
        .unwrap()
        .unwrap();

    assert!(found.ptr_eq(&ursula));
    assert_eq!(found.virtual_value("book_count"), Some(Value::Integer(1)));

    let json = found.to_json();
    assert_eq!(json["name"], "Ursula");
    assert_eq!(json["book_count"], 1);
}

#[test]
fn test_unconvertible_stored_value_is_kept() {
    let session = library();
    session
        .execute(
            "INSERT INTO author (name, created_at) VALUES (?, ?)",
            &[Value::from("Ged"), Value::from("not a date")],
        )
        .unwrap();

    let author = session.query("author").find_one().unwrap().unwrap();
    assert_eq!(author.value("created_at").unwrap(), Value::from("not a date"));
    assert!(!author.is_modified());

    author.reload().unwrap();
    assert_eq!(author.value("created_at").unwrap(), Value::from("not a date"));
}

// ==================== Identity Cache Tests ====================

#[test]
fn test_identity_uniqueness() {
    let session = library();
    let book = book(&session, "The Word for World Is Forest");
    let id = book.id().unwrap();

    let first = session.query("book").filter_by_id(id).find_one().unwrap().unwrap();
    let second = session.query("book").find().unwrap();

    assert!(first.ptr_eq(&book));
    assert!(second.first().unwrap().ptr_eq(&book));
    assert_eq!(first, second.first().cloned().unwrap());
}

#[test]
fn test_identity_survives_reload_by_query() {
    let session = library();
    let book = book(&session, "Searoad");
    let id = book.id().unwrap();

    session.clear_cache();
    let a = session.query("book").filter_by_id(id).find_one().unwrap().unwrap();
    let b = session.query("book").filter_by("title", "Searoad").find_one().unwrap().unwrap();

    assert!(!a.ptr_eq(&book));
    assert!(a.ptr_eq(&b));
}

#[test]
fn test_create_with_cached_id_returns_cached_instance() {
    let session = library();
    let book = book(&session, "Malafrena");

    let again = session
        .create("book", Record::new().with("id", book.id()))
        .unwrap();
    assert!(again.ptr_eq(&book));
}

#[test]
fn test_pooling_disabled_yields_fresh_instances() {
    let session = library_with(
        SessionConfig::builder("sqlite::memory:")
            .instance_pooling(false)
            .build(),
    );
    assert!(!session.instance_pooling());

    let book = book(&session, "The Telling");
    assert_eq!(session.cache_len(), 0);

    let a = session.query("book").find_one().unwrap().unwrap();
    let b = session.query("book").find_one().unwrap().unwrap();
    assert!(!a.ptr_eq(&b));
    assert!(a.same_row(&b));
    assert!(a.same_row(&book));
}

#[test]
fn test_pooling_can_be_toggled() {
    let session = library();
    book(&session, "Gifts");

    session.set_instance_pooling(false);
    let a = session.query("book").find_one().unwrap().unwrap();
    session.set_instance_pooling(true);
    let b = session.query("book").find_one().unwrap().unwrap();

    assert!(!a.ptr_eq(&b));
}

#[test]
fn test_bulk_update_leaves_cached_entity_stale() {
    let session = library();
    let book = book(&session, "Rocannon's World");
    let id = book.id().unwrap();

    let affected = session
        .query("book")
        .filter_by_id(id)
        .update(Record::new().with("title", "Planet of Exile"))
        .unwrap();
    assert_eq!(affected, 1);

    // Cached instance is neither refreshed nor evicted
    assert_eq!(book.value("title").unwrap(), Value::from("Rocannon's World"));
    let again = session.query("book").filter_by_id(id).find_one().unwrap().unwrap();
    assert!(again.ptr_eq(&book));
    assert_eq!(again.value("title").unwrap(), Value::from("Rocannon's World"));

    book.reload().unwrap();
    assert_eq!(book.value("title").unwrap(), Value::from("Planet of Exile"));
    assert!(!book.is_modified());
}

#[test]
fn test_bulk_delete_leaves_cache_entries() {
    let session = library();
    book(&session, "City of Illusions");
    book(&session, "Lavinia");
    let cached = session.cache_len();

    let deleted = session
        .query("book")
        .filter_by("title", "Lavinia")
        .delete()
        .unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(session.cache_len(), cached);
    assert_eq!(session.query("book").count().unwrap(), 1);
}

#[test]
fn test_truncate_evicts_table() {
    let session = library();
    book(&session, "A");
    book(&session, "B");
    author(&session, "Ursula");
    assert_eq!(session.cache_len(), 3);

    let deleted = session.query("book").filter_by("title", "A").truncate().unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(session.cache_len(), 1);
}

// ==================== Parent / Children Tests ====================

#[test]
fn test_parent_child_symmetry() {
    let session = library();
    let ursula = author(&session, "Ursula");
    let book = book(&session, "The Dispossessed");

    book.set("author", &ursula).unwrap();

    assert_eq!(book.value("author_id").unwrap(), Value::Integer(ursula.id().unwrap()));
    assert!(book.parent("author").unwrap().unwrap().ptr_eq(&ursula));
    let books = ursula.get("books").unwrap().into_set().unwrap();
    assert!(books.contains(&book));

    ursula.remove_child(&book).unwrap();

    assert_eq!(book.value("author_id").unwrap(), Value::Null);
    assert!(!ursula.children("books").unwrap().contains(&book));
    assert!(book.parent("author").unwrap().is_none());

    ursula.save().unwrap();
    session.clear_cache();
    let stored = session.query("book").filter_by("author_id", Value::Null).count().unwrap();
    assert_eq!(stored, 1);
}

#[test]
fn test_add_child_cascades_on_save() {
    let session = library();
    let ursula = author(&session, "Ursula");
    let book = session
        .create("book", Record::new().with("title", "The Beginning Place"))
        .unwrap();

    ursula.add_child(&book).unwrap();
    assert!(book.is_new());
    assert_eq!(ursula.pending_operations(), 1);

    ursula.save().unwrap();

    assert!(!book.is_new());
    assert_eq!(ursula.pending_operations(), 0);
    let stored = session
        .query("book")
        .filter_by("author_id", ursula.id())
        .find_one()
        .unwrap()
        .unwrap();
    assert!(stored.ptr_eq(&book));
}

#[test]
fn test_new_parent_is_saved_first() {
    let session = library();
    let ursula = session
        .create("author", Record::new().with("name", "Ursula"))
        .unwrap();
    let book = session
        .create("book", Record::new().with("title", "Worlds of Exile"))
        .unwrap();

    book.set("author", &ursula).unwrap();

    assert!(!ursula.is_new());
    assert_eq!(book.value("author_id").unwrap(), Value::from(ursula.id()));
}

#[test]
fn test_reparenting_moves_child() {
    let session = library();
    let first = author(&session, "First");
    let second = author(&session, "Second");
    let book = book(&session, "Changing Planes");

    first.add_child(&book).unwrap();
    first.save().unwrap();
    assert!(first.has_child(&book).unwrap());

    book.set("author", &second).unwrap();

    assert!(!first.children("book").unwrap().contains(&book));
    assert!(second.children("book").unwrap().contains(&book));

    second.save().unwrap();
    session.clear_cache();
    let stored = session
        .query("book")
        .filter_by("author_id", second.id())
        .count()
        .unwrap();
    assert_eq!(stored, 1);
}

#[test]
fn test_clear_parent_with_null() {
    let session = library();
    let ursula = author(&session, "Ursula");
    let book = book(&session, "Tales from Earthsea");
    book.set("author", &ursula).unwrap();

    book.set("author", Value::Null).unwrap();
    assert_eq!(book.value("author_id").unwrap(), Value::Null);
    assert!(matches!(book.get("author").unwrap(), Field::Parent(None)));
}

#[test]
fn test_parent_loads_lazily_from_foreign_key() {
    let session = library();
    let ursula = author(&session, "Ursula");
    let book = book(&session, "Eye of the Heron");
    book.set("author_id", ursula.id()).unwrap();
    book.save().unwrap();
    session.clear_cache();

    let reloaded = session.query("book").find_one().unwrap().unwrap();
    let parent = reloaded.get("author").unwrap().into_entity().unwrap();
    assert_eq!(parent.value("name").unwrap(), Value::from("Ursula"));
    assert!(parent.same_row(&ursula));
}

#[test]
fn test_set_children_adds_members() {
    let session = library();
    let ursula = author(&session, "Ursula");
    let set = session
        .collection_from(
            "book",
            vec![
                Record::new().with("title", "A Wizard of Earthsea"),
                Record::new().with("title", "The Tombs of Atuan"),
            ],
        )
        .unwrap();

    ursula.set("books", &set).unwrap();
    ursula.save().unwrap();

    assert_eq!(ursula.children("books").unwrap().len(), 2);
    assert_eq!(
        session
            .query("book")
            .filter_by("author_id", ursula.id())
            .count()
            .unwrap(),
        2
    );
}

#[test]
fn test_relation_type_mismatch() {
    let session = library();
    let book = book(&session, "The Other Wind");
    let tag = session.create("tag", Record::new().with("name", "fantasy")).unwrap();

    let err = book.set("author", &tag).unwrap_err();
    assert!(matches!(err, Error::RelationTypeMismatch { ref expected, ref given }
        if expected == "author" && given == "tag"));
}

#[test]
fn test_no_relation() {
    let session = library();
    let tag = session.create("tag", Record::new()).unwrap();
    assert!(matches!(tag.parent("author"), Err(Error::NoRelation { .. })));
    assert!(matches!(tag.children("author"), Err(Error::NoRelation { .. })));
    assert!(matches!(tag.foreign_objects("author"), Err(Error::NoRelation { .. })));
}

// ==================== Peer Tests ====================

#[test]
fn test_peers_link_through_junction() {
    let session = library();
    let book = book(&session, "The Compass Rose");
    let tag = session.create("tag", Record::new().with("name", "stories")).unwrap();

    book.add_foreign_object(&tag).unwrap();
    assert!(!tag.is_new());
    assert_eq!(session.query("book_tag").count().unwrap(), 0);

    book.save().unwrap();
    assert_eq!(session.query("book_tag").count().unwrap(), 1);

    let tags = book.get("tags").unwrap().into_set().unwrap();
    assert!(tags.contains(&tag));
    assert!(tag.foreign_objects("books").unwrap().contains(&book));

    // Linking twice is a no-op
    book.add_foreign_object(&tag).unwrap();
    assert_eq!(book.pending_operations(), 0);

    book.remove_foreign_object(&tag).unwrap();
    assert!(book.foreign_objects("tag").unwrap().is_empty());
    book.save().unwrap();
    assert_eq!(session.query("book_tag").count().unwrap(), 0);
}

#[test]
fn test_unlink_from_other_side_drops_pending_link() {
    let session = library();
    let book = book(&session, "The Lathe of Heaven");
    let dreams = session.create("tag", Record::new().with("name", "dreams")).unwrap();
    let rivers = session.create("tag", Record::new().with("name", "rivers")).unwrap();
    dreams.save().unwrap();
    rivers.save().unwrap();

    // The book's peer set is loaded before the tag links it
    book.foreign_objects("tag").unwrap();
    dreams.add_foreign_object(&book).unwrap();
    assert!(book.foreign_objects("tag").unwrap().contains(&dreams));
    book.remove_foreign_object(&dreams).unwrap();
    assert!(book.foreign_objects("tag").unwrap().is_empty());
    assert!(dreams.foreign_objects("books").unwrap().is_empty());
    assert_eq!(dreams.pending_operations(), 0);

    // The tag's side only: the book learns of the link when it is unlinked
    let other = session.create("book", Record::new().with("title", "Always Coming Home")).unwrap();
    other.save().unwrap();
    rivers.add_foreign_object(&other).unwrap();
    other.remove_foreign_object(&rivers).unwrap();
    assert!(rivers.foreign_objects("books").unwrap().is_empty());
    assert_eq!(rivers.pending_operations(), 0);

    for entity in [&book, &other, &dreams, &rivers] {
        entity.save().unwrap();
    }
    assert_eq!(session.query("book_tag").count().unwrap(), 0);
}

#[test]
fn test_peers_load_from_storage() {
    let session = library();
    let book = book(&session, "Four Ways to Forgiveness");
    let a = session.create("tag", Record::new().with("name", "a")).unwrap();
    let b = session.create("tag", Record::new().with("name", "b")).unwrap();
    book.add_foreign_object(&a).unwrap();
    book.add_foreign_object(&b).unwrap();
    book.save().unwrap();

    session.clear_cache();
    let reloaded = session.query("book").find_one().unwrap().unwrap();
    let tags = reloaded.foreign_objects("tags").unwrap();
    assert_eq!(tags.len(), 2);
    let names: Vec<_> = tags.to_column_values("name").unwrap();
    assert!(names.contains(&Value::from("a")));
    assert!(names.contains(&Value::from("b")));
}

#[test]
fn test_set_foreign_objects_replaces_links() {
    let session = library();
    let book = book(&session, "Unlocking the Air");
    let a = session.create("tag", Record::new().with("name", "a")).unwrap();
    let b = session.create("tag", Record::new().with("name", "b")).unwrap();
    book.add_foreign_object(&a).unwrap();
    book.save().unwrap();

    let mut replacement = session.collection("tag").unwrap();
    replacement.add(b.clone()).unwrap();
    book.set("tags", &replacement).unwrap();
    book.save().unwrap();

    let tags = book.foreign_objects("tag").unwrap();
    assert_eq!(tags.len(), 1);
    assert!(tags.contains(&b));
    assert_eq!(session.query("book_tag").count().unwrap(), 1);
}

// ==================== Collection Tests ====================

#[test]
fn test_set_diff() {
    let session = library();
    let a = book(&session, "a");
    let b = book(&session, "b");
    let c = book(&session, "c");

    let all = session.query("book").order_by("id", Direction::Asc).find().unwrap();
    let mut only_b = session.collection("book").unwrap();
    only_b.add(b.clone()).unwrap();

    let diff = all.diff(&only_b).unwrap();
    assert_eq!(diff.len(), 2);
    assert!(diff.get(0).unwrap().ptr_eq(&a));
    assert!(diff.get(1).unwrap().ptr_eq(&c));

    let tags = session.collection("tag").unwrap();
    assert!(matches!(all.diff(&tags), Err(Error::TableMismatch { .. })));
}

#[test]
fn test_collection_rejects_other_table() {
    let session = library();
    let ursula = author(&session, "Ursula");
    let mut books = session.collection("book").unwrap();
    assert!(matches!(books.add(ursula), Err(Error::TableMismatch { .. })));
}

#[test]
fn test_collection_save_and_projection() {
    let session = library();
    let set = session
        .collection_from(
            "book",
            vec![
                Record::new().with("title", "x").with("pages", 10),
                Record::new().with("title", "y").with("pages", 20),
            ],
        )
        .unwrap();

    set.save().unwrap();
    assert_eq!(set.ids().len(), 2);
    assert_eq!(
        set.to_column_values("pages").unwrap(),
        vec![Value::Integer(10), Value::Integer(20)]
    );
    let maps = set.to_column_maps(&["title", "pages"]).unwrap();
    assert_eq!(maps[1].get("title"), Some(&Value::from("y")));
    assert!(matches!(set.to_column_values("isbn"), Err(Error::UnknownColumn { .. })));

    set.delete().unwrap();
    assert_eq!(session.query("book").count().unwrap(), 0);
}

#[test]
fn test_collection_save_rolls_back_on_failure() {
    let session = library();
    session
        .execute(
            "CREATE TRIGGER no_forbidden BEFORE INSERT ON book
             WHEN NEW.title = 'forbidden'
             BEGIN SELECT RAISE(ABORT, 'forbidden title'); END",
            &[],
        )
        .unwrap();

    let set = session
        .collection_from(
            "book",
            vec![
                Record::new().with("title", "fine"),
                Record::new().with("title", "forbidden"),
            ],
        )
        .unwrap();

    assert!(set.save().is_err());
    assert_eq!(session.query("book").count().unwrap(), 0);
}

// ==================== Query Tests ====================

#[test]
fn test_filter_null_rewrites_to_is_null() {
    let session = library();
    let nameless = session.create("author", Record::new()).unwrap();
    nameless.save().unwrap();
    author(&session, "");

    let found = session
        .query("author")
        .filter_by("name", Value::Null)
        .find()
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found.first().unwrap().ptr_eq(&nameless));

    let one = session
        .query("author")
        .filter_by("name", None::<String>)
        .find_one()
        .unwrap()
        .unwrap();
    assert!(one.ptr_eq(&nameless));

    let not_null = session
        .query("author")
        .filter_by_cmp("name", Value::Null, Comparison::IsNotNull)
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(not_null, 1);
}

#[test]
fn test_comparisons() {
    let session = library();
    for (title, pages) in [("short", 90), ("medium", 250), ("long", 600)] {
        session
            .create("book", Record::new().with("title", title).with("pages", pages))
            .unwrap()
            .save()
            .unwrap();
    }

    let over_100 = session
        .query("book")
        .filter_by_cmp("pages", 100, ">".parse().unwrap())
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(over_100, 2);

    let listed = session
        .query("book")
        .filter_by_cmp("title", vec!["short", "long"], Comparison::In)
        .unwrap()
        .order_by("pages", Direction::Asc)
        .find()
        .unwrap();
    assert_eq!(titles(&listed), vec!["short", "long"]);

    let comma_list = session
        .query("book")
        .filter_by_cmp("title", "short, medium", Comparison::In)
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(comma_list, 2);

    let empty_in = session
        .query("book")
        .filter_by_cmp("title", FilterValue::List(Vec::new()), Comparison::In)
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(empty_in, 0);

    let like = session
        .query("book")
        .filter_by_cmp("title", "%o%", Comparison::Like)
        .unwrap()
        .find()
        .unwrap();
    assert_eq!(titles(&like), vec!["short", "long"]);

    assert!(matches!(
        session.query("book").filter_by_cmp("pages", vec![1, 2], Comparison::Gt),
        Err(Error::QueryState(_))
    ));
}

#[test]
fn test_where_raw_order_limit_offset() {
    let session = library();
    for title in ["d", "a", "c", "b"] {
        book(&session, title);
    }

    let page = session
        .query("book")
        .where_raw("length(title) = ?", vec![Value::Integer(1)])
        .order_by("title", Direction::Desc)
        .limit(2)
        .offset(1)
        .find()
        .unwrap();
    assert_eq!(titles(&page), vec!["c", "b"]);

    let (sql, params) = session.query("book").alias("b").filter_by("title", "a").limit(3).to_sql();
    assert_eq!(
        sql,
        "SELECT \"b\".* FROM \"book\" AS \"b\" WHERE (\"b\".\"title\" = ?) LIMIT 3"
    );
    assert_eq!(params, vec![Value::from("a")]);
}

#[test]
fn test_count_ignores_window_and_exists() {
    let session = library();
    for title in ["a", "b", "c"] {
        book(&session, title);
    }

    let count = session
        .query("book")
        .order_by("title", Direction::Asc)
        .limit(1)
        .offset(1)
        .count()
        .unwrap();
    assert_eq!(count, 3);

    assert!(session.query("book").filter_by("title", "b").exists().unwrap());
    assert!(!session.query("book").filter_by("title", "z").exists().unwrap());
}

#[test]
fn test_join_inference() {
    let session = library();
    let ursula = author(&session, "Ursula");
    let other = author(&session, "Other");
    let mine = book(&session, "The Eye of the Heron");
    let theirs = book(&session, "Something Else");
    mine.set("author", &ursula).unwrap();
    theirs.set("author", &other).unwrap();
    ursula.save().unwrap();
    other.save().unwrap();

    let books = session
        .query("book")
        .inner_join("author", None, None)
        .unwrap()
        .filter_by("author.name", "Ursula")
        .find()
        .unwrap();
    assert_eq!(books.len(), 1);
    assert!(books.first().unwrap().ptr_eq(&mine));

    // Child direction, with aliases on both sides
    let authors = session
        .query("author")
        .alias("a")
        .inner_join("book", Some("b"), None)
        .unwrap()
        .filter_by("b.title", "Something Else")
        .find()
        .unwrap();
    assert_eq!(authors.len(), 1);
    assert!(authors.first().unwrap().ptr_eq(&other));

    let err = session.query("book").inner_join("tag", None, None).unwrap_err();
    assert!(matches!(err, Error::JoinCondition { ref table, ref joined }
        if table == "book" && joined == "tag"));
}

#[test]
fn test_explicit_join_group_having() {
    let session = library();
    let ursula = author(&session, "Ursula");
    author(&session, "Nobody");
    for title in ["one", "two"] {
        book(&session, title).set("author", &ursula).unwrap();
    }
    ursula.save().unwrap();

    let prolific = session
        .query("author")
        .left_join("book", None, Some("\"book\".\"author_id\" = \"author\".\"id\""))
        .unwrap()
        .group_by("author.id")
        .having("COUNT(book.id) >= ?", vec![Value::Integer(2)])
        .find()
        .unwrap();
    assert_eq!(prolific.len(), 1);
    assert!(prolific.first().unwrap().ptr_eq(&ursula));
}

#[test]
fn test_find_one_or_create_seeds_exact_filters() {
    let session = library();
    let existing = book(&session, "Gifts");

    let found = session
        .query("book")
        .filter_by("title", "Gifts")
        .find_one_or_create()
        .unwrap();
    assert!(found.ptr_eq(&existing));

    let created = session
        .query("book")
        .filter_by("title", "Voices")
        .filter_by_cmp("pages", 100, Comparison::Gt)
        .unwrap()
        .find_one_or_create()
        .unwrap();
    assert!(created.is_new());
    assert_eq!(created.value("title").unwrap(), Value::from("Voices"));
    assert_eq!(created.value("pages").unwrap(), Value::Integer(0));
}

#[test]
fn test_chunk_termination() {
    let session = library();
    for i in 0..7 {
        book(&session, &format!("book {}", i));
    }

    let mut sizes = Vec::new();
    let mut indexes = Vec::new();
    let chunks = session
        .query("book")
        .order_by("id", Direction::Asc)
        .chunk(3, |batch, index| {
            sizes.push(batch.len());
            indexes.push(index);
            Ok(())
        })
        .unwrap();
    assert_eq!(chunks, 3);
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_eq!(indexes, vec![1, 2, 3]);

    let mut calls = 0;
    session
        .query("book")
        .chunk(7, |batch, _| {
            assert_eq!(batch.len(), 7);
            calls += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(calls, 1);

    assert!(matches!(
        session.query("book").chunk(0, |_, _| Ok(())),
        Err(Error::QueryState(_))
    ));
}

#[test]
fn test_chunk_without_offset_increase() {
    let session = library();
    for i in 0..5 {
        book(&session, &format!("book {}", i));
    }

    let mut sizes = Vec::new();
    let chunks = session
        .query("book")
        .chunk_without_offset_increase(2, |batch, _| {
            sizes.push(batch.len());
            batch.delete()
        })
        .unwrap();

    assert_eq!(chunks, 3);
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(session.query("book").count().unwrap(), 0);
}

#[test]
fn test_chunk_callback_error_stops_iteration() {
    let session = library();
    for i in 0..4 {
        book(&session, &format!("book {}", i));
    }

    let mut calls = 0;
    let err = session
        .query("book")
        .chunk(1, |_, index| {
            calls += 1;
            if index == 2 {
                return Err(Error::callback("stop"));
            }
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, Error::Callback(_)));
    assert_eq!(calls, 2);
}

#[test]
fn test_paginate() {
    let session = library();
    for i in 0..7 {
        book(&session, &format!("book {}", i));
    }

    let pager = session
        .query("book")
        .order_by("id", Direction::Asc)
        .paginate(2, 3)
        .unwrap();
    assert_eq!(pager.total(), 7);
    assert_eq!(pager.results().len(), 3);
    assert_eq!(pager.last_page(), 3);
    assert_eq!(pager.previous_page(), Some(1));
    assert_eq!(pager.next_page(), Some(3));
    assert!(pager.have_to_paginate());
    assert_eq!(pager.links(5), vec![1, 2, 3]);
    assert_eq!(
        pager.results().first().unwrap().value("title").unwrap(),
        Value::from("book 3")
    );

    assert!(matches!(
        session.query("book").paginate(0, 3),
        Err(Error::QueryState(_))
    ));
}

#[test]
fn test_paginate_far_past_the_end() {
    let session = library();
    for i in 0..7 {
        book(&session, &format!("book {}", i));
    }

    let pager = session.query("book").paginate(u64::MAX, 2).unwrap();
    assert_eq!(pager.total(), 7);
    assert!(pager.results().is_empty());
    assert_eq!(pager.next_page(), None);

    let pager = session.query("book").paginate(u64::MAX / 2, 3).unwrap();
    assert!(pager.results().is_empty());

    let mut calls = 0;
    let chunks = session
        .query("book")
        .offset(u64::MAX - 1)
        .chunk(u64::MAX, |_, _| {
            calls += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(chunks, 0);
    assert_eq!(calls, 0);
}

// ==================== Transaction Tests ====================

#[test]
fn test_transaction_rolls_back_on_error() {
    let session = library();

    let result: Result<()> = session.transaction(|| {
        author(&session, "Ghost");
        Err(Error::callback("abort"))
    });

    assert!(matches!(result, Err(Error::Callback(_))));
    assert_eq!(session.query("author").count().unwrap(), 0);
}

#[test]
fn test_transaction_commits() {
    let session = library();

    let id = session
        .transaction(|| {
            let ursula = author(&session, "Ursula");
            book(&session, "Lavinia").set("author", &ursula)?;
            ursula.save()?;
            Ok(ursula.id())
        })
        .unwrap();

    assert_eq!(session.query("book").filter_by("author_id", id).count().unwrap(), 1);
}

// ==================== Registry Tests ====================

struct CountingHooks {
    initialized: Rc<Cell<usize>>,
}

impl EntityClass for CountingHooks {
    fn initialize(&self, _entity: &Entity) -> Result<()> {
        self.initialized.set(self.initialized.get() + 1);
        Ok(())
    }

    fn before_save(&self, entity: &Entity) -> Result<()> {
        let name = entity.value("name")?;
        if name.is_null() {
            return Err(Error::invalid_value("author", "name", "name is required"));
        }
        entity.set("name", name.to_string().trim())
    }
}

struct LongestFirst;

impl QueryClass for LongestFirst {
    fn prepare(&self, query: QueryBuilder) -> QueryBuilder {
        query.order_by("pages", Direction::Desc)
    }
}

#[test]
fn test_entity_class_hooks() {
    let session = library_with(
        SessionConfig::builder("sqlite::memory:")
            .namespace("library")
            .build(),
    );
    let initialized = Rc::new(Cell::new(0));
    session.register_entity_class(
        "library::Author",
        CountingHooks {
            initialized: Rc::clone(&initialized),
        },
    );

    let ursula = author(&session, "  Ursula ");
    assert_eq!(initialized.get(), 1);
    assert_eq!(ursula.value("name").unwrap(), Value::from("Ursula"));

    let nameless = session.create("author", Record::new()).unwrap();
    assert!(matches!(nameless.save(), Err(Error::InvalidValue { .. })));
    assert!(nameless.is_new());

    // Books have no registered class
    book(&session, "Lavinia");
    assert_eq!(initialized.get(), 2);
}

#[test]
fn test_query_class_scope() {
    let session = library();
    session.register_query_class("BookQuery", LongestFirst);

    for (title, pages) in [("short", 90), ("long", 600), ("medium", 250)] {
        session
            .create("book", Record::new().with("title", title).with("pages", pages))
            .unwrap()
            .save()
            .unwrap();
    }

    let books = session.query("book").find().unwrap();
    assert_eq!(titles(&books), vec!["long", "medium", "short"]);
}

// ==================== Query Log Tests ====================

#[test]
fn test_query_log() {
    let session = library();
    session.clear_query_log();
    assert_eq!(session.total_queries(), 0);

    book(&session, "Logged");
    session.query("book").find().unwrap();

    assert_eq!(session.total_queries(), 2);
    let last = session.last_queries(2);
    assert!(last[0].sql.starts_with("INSERT INTO \"book\""));
    assert_eq!(last[0].params, vec![Value::from("Logged"), Value::Integer(0), Value::Integer(0), Value::Null]);
    assert!(last[1].sql.starts_with("SELECT \"book\".*"));

    session.set_query_logging(false);
    session.query("book").find().unwrap();
    assert_eq!(session.total_queries(), 3);
    assert!(session.last_queries(10).is_empty());
}

#[test]
fn test_session_closed() {
    let session = library();
    let book = book(&session, "Orphan");
    drop(session);

    assert!(matches!(book.save(), Err(Error::SessionClosed)));
    assert_eq!(book.value("title").unwrap(), Value::from("Orphan"));
}
