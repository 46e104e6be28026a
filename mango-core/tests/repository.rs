mod common;

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use bson::{Bson, doc};
use common::*;
use mango_core::{
    document::Uid,
    error::ErrorKind,
    facade::MangoRepository,
    query::SearchParams,
    repository::{IdentityGenerator, MangoRepoOptions},
    validator::{MangoValidator, Rule, Schema, ValidationOptions, ValidatorOptions},
};

struct Sequence(AtomicI64);

impl IdentityGenerator for Sequence {
    fn generate(&self) -> Uid {
        Uid::from(format!("generated-{}", self.0.fetch_add(1, Ordering::SeqCst)))
    }
}

fn repository() -> MangoRepository {
    MangoRepository::new(repo_options()).unwrap()
}

fn car_schema() -> Schema {
    Schema::new("Car")
        .field("make", [Rule::IsString, Rule::NotEmpty])
        .field("model", [Rule::IsString])
        .field("model_year", [Rule::IsInt, Rule::Min(1886.0)])
}

#[test]
fn construction_indexes_the_collection() {
    let repo = repository();

    assert_eq!(repo.cache().collection(), cars().as_slice());
    assert_eq!(repo.cache().root().len(), 5);
    assert_eq!(repo.cache().get(&Uid::from(NISSAN)), Some(&car(NISSAN)));
    assert_eq!(repo.uid(), "vin");
}

#[test]
fn construction_rejects_documents_without_identity() {
    let err = MangoRepository::new(
        MangoRepoOptions::default()
            .with_id_key("vin")
            .with_collection(vec![doc! { "make": "Scion" }]),
    )
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[test]
fn create_publishes_a_new_snapshot() {
    let mut repo = repository();
    let old = repo.cache().clone();

    let created = repo
        .create(&doc! { "vin": " 1FTEW1E8 ", "make": "Ford", "model": "F-150", "model_year": 2014 })
        .unwrap();

    assert_eq!(created.get_str("vin").unwrap(), "1FTEW1E8");
    assert_eq!(repo.cache().len(), 6);
    assert_eq!(repo.cache().collection().last(), Some(&created));
    assert_eq!(repo.find_one(&Uid::from("1FTEW1E8"), SearchParams::default()).unwrap(), Some(created));
    assert_eq!(old.len(), 5);
    assert!(!old.ptr_eq(repo.cache()));
}

#[test]
fn create_generates_missing_identities() {
    let mut repo = repository().with_identity_generator(Arc::new(Sequence(AtomicI64::new(1))));

    let first = repo.create(&doc! { "make": "Ford" }).unwrap();
    let second = repo.create(&doc! { "vin": "", "make": "Ford" }).unwrap();

    assert_eq!(first.get_str("vin").unwrap(), "generated-1");
    assert_eq!(second.get_str("vin").unwrap(), "generated-2");
}

#[test]
fn create_conflicts_on_existing_identity() {
    let mut repo = repository();
    let err = repo.create(&doc! { "vin": SCION, "make": "Scion" }).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.code(), 409);
    assert_eq!(err.message(), format!("Entity with vin \"{SCION}\" already exists"));
    assert_eq!(err.errors(), Some(&Bson::Document(doc! { "vin": SCION })));
    assert_eq!(repo.cache().len(), 5);
}

#[test]
fn conflict_context_carries_the_shaped_candidate() {
    let mut repo = repository();
    let err = repo.create(&doc! { "vin": format!("  {SCION} "), "make": "Scion" }).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.data().get_document("dto").unwrap(), &doc! { "vin": SCION, "make": "Scion" });
}

#[test]
fn create_rejects_unusable_identities() {
    let mut repo = repository();
    let err = repo.create(&doc! { "vin": true }).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unprocessable);
    assert_eq!(err.data().get_document("dto").unwrap(), &doc! { "vin": true });
}

#[test]
fn patch_merges_and_keeps_readonly_fields() {
    let mut repo = repository();

    let patched = repo
        .patch(&Uid::from(SCION), &doc! { "vin": "other", "make": "Toyota", "model": "xB" }, &["make"])
        .unwrap();

    assert_eq!(patched, doc! { "make": "Scion", "model": "xB", "model_year": 2010, "vin": SCION });
    assert_eq!(repo.cache().get(&Uid::from(SCION)), Some(&patched));
    assert_eq!(repo.cache().collection()[0], patched);
    assert!(repo.cache().get(&Uid::from("other")).is_none());
}

#[test]
fn patch_requires_an_existing_entity() {
    let mut repo = repository();
    let err = repo.patch(&Uid::from("bad-vin"), &doc! { "model": "x" }, &[]).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.message().contains("\"bad-vin\" does not exist"));
}

#[test]
fn delete_best_effort_skips_missing_identities() {
    let mut repo = repository();

    assert_eq!(repo.delete("bad-vin", false).unwrap(), Vec::<Uid>::new());
    assert_eq!(repo.cache().len(), 5);

    let removed = repo.delete(vec![NISSAN, "bad-vin", SUBARU], false).unwrap();
    assert_eq!(removed, vec![Uid::from(NISSAN), Uid::from(SUBARU)]);
    assert_eq!(vins(repo.cache().collection()), vec![SCION, MITSUBISHI, CHEVROLET]);
}

#[test]
fn delete_with_should_exist_is_all_or_nothing() {
    let mut repo = repository();
    let before = repo.cache().clone();

    let err = repo.delete(vec![NISSAN, "bad-vin"], true).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.data().get_array("uids").unwrap().len(), 2);
    assert!(err.data().get_bool("should_exist").unwrap());
    assert!(err.message().contains("\"bad-vin\" does not exist"));
    assert_eq!(err.errors(), Some(&Bson::Document(doc! { "vin": "bad-vin" })));
    assert!(repo.cache().ptr_eq(&before));

    assert_eq!(repo.delete(NISSAN, true).unwrap(), vec![Uid::from(NISSAN)]);
    assert!(repo.find_one(&Uid::from(NISSAN), SearchParams::default()).unwrap().is_none());
}

#[test]
fn clear_and_set_cache_replace_everything() {
    let mut repo = repository();

    assert!(repo.clear());
    assert!(repo.cache().is_empty());
    assert!(repo.find(SearchParams::default()).unwrap().is_empty());

    let cache = repo.set_cache(vec![car(SCION), car(NISSAN)]).unwrap();
    assert!(cache.ptr_eq(repo.cache()));
    assert_eq!(vins(&repo.find(SearchParams::default()).unwrap()), vec![SCION, NISSAN]);
}

#[test]
fn failed_set_cache_keeps_the_published_cache() {
    let mut repo = repository();
    let before = repo.cache().clone();

    assert!(repo.set_cache(vec![doc! { "make": "nobody" }]).is_err());
    assert!(repo.cache().ptr_eq(&before));
}

#[test]
fn save_upserts_each_dto() {
    let mut repo = repository();

    let saved = repo
        .save(vec![
            doc! { "vin": SCION, "model": "xD" },
            doc! { "vin": "JH4KA8260", "make": "Acura", "model": "Legend", "model_year": 1991 },
        ])
        .unwrap();

    assert_eq!(saved[0], doc! { "make": "Scion", "model": "xD", "model_year": 2010, "vin": SCION });
    assert_eq!(saved[1].get_str("make").unwrap(), "Acura");
    assert_eq!(repo.cache().len(), 6);
}

#[test]
fn save_without_identity_creates_with_a_generated_one() {
    let mut repo = repository();

    let saved = repo.save(doc! { "make": "NEW" }).unwrap();
    let vin = saved[0].get_str("vin").unwrap();

    assert!(uuid::Uuid::parse_str(vin).is_ok());
    assert_eq!(saved[0].get_str("make").unwrap(), "NEW");
    assert_eq!(repo.find_one(&Uid::from(vin), SearchParams::default()).unwrap(), Some(saved[0].clone()));
    assert_eq!(repo.cache().len(), 6);
}

#[test]
fn save_keeps_earlier_upserts_when_a_later_one_fails() {
    let mut repo = repository().with_validator(MangoValidator::new(car_schema(), ValidatorOptions::default()));

    let err = repo
        .save(vec![
            doc! { "vin": SCION, "model": "xD" },
            doc! { "vin": "new", "make": "", "model": "x", "model_year": 2000 },
        ])
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(repo.cache().get(&Uid::from(SCION)).unwrap().get_str("model").unwrap(), "xD");
    assert!(!repo.cache().contains(&Uid::from("new")));
}

#[test]
fn validation_failures_block_writes() {
    let mut repo = repository().with_validator(MangoValidator::new(car_schema(), ValidatorOptions::default()));

    let err = repo
        .create(&doc! { "vin": "new", "make": 7, "model": "x", "model_year": 1700 })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(err.message(), "Car entity validation failure: [make,model_year]");
    assert_eq!(err.data().get_str("model_name").unwrap(), "Car");
    assert_eq!(err.data().get_array("errors").unwrap().len(), 2);
    assert!(!repo.cache().contains(&Uid::from("new")));

    let err = repo.patch(&Uid::from(SCION), &doc! { "model_year": "soon" }, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(repo.cache().get(&Uid::from(SCION)), Some(&car(SCION)));
}

#[test]
fn whitelisting_strips_undeclared_fields_but_not_the_identity() {
    let options = ValidatorOptions::default().with_validator(ValidationOptions {
        whitelist: true,
        ..ValidationOptions::default()
    });
    let mut repo = repository().with_validator(MangoValidator::new(car_schema(), options));

    let created = repo
        .create(&doc! { "vin": "new", "make": "Kia", "model": "Rio", "model_year": 2001, "color": "red" })
        .unwrap();

    assert!(!created.contains_key("color"));
    assert_eq!(created.get_str("vin").unwrap(), "new");
}

#[test]
fn repositories_answer_finder_reads() {
    let mut repo = repository();
    repo.create(&doc! { "vin": "new", "make": "Scion", "model": "xA", "model_year": 2006 }).unwrap();

    assert_eq!(repo.query("make=Scion&sort=model").unwrap().len(), 2);
    assert_eq!(repo.query_one(&Uid::from("new"), "fields=model").unwrap(), Some(doc! { "vin": "new", "model": "xA" }));
    assert_eq!(
        repo.aggregate(doc! { "$count": "total" }).unwrap(),
        vec![doc! { "total": 6 }],
    );
    assert_eq!(
        repo.find_by_ids(&[Uid::from("new"), Uid::from(SCION)], SearchParams::default()).unwrap().len(),
        2,
    );
}
