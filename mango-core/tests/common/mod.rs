#![allow(dead_code)]

use bson::{Document, doc};
use mango_core::{finder::MangoFinderOptions, repository::MangoRepoOptions};

pub const CARS_ID_KEY: &str = "vin";

pub const SCION: &str = "3221085d-6f55-4d23-842a-aeb0e413fca8";
pub const MITSUBISHI: &str = "5b38c222-bf0c-4972-9810-d8cd7e399a56";
pub const NISSAN: &str = "6e177f82-055d-464d-b118-cf36b10fb77d";
pub const CHEVROLET: &str = "e3df6457-3901-4c25-90cd-6aaabf3cdcb8";
pub const SUBARU: &str = "eda31c5a-7b59-4250-b365-e66661930bc8";

pub fn cars() -> Vec<Document> {
    vec![
        doc! { "make": "Scion", "model": "tC", "model_year": 2010, "vin": SCION },
        doc! { "make": "Mitsubishi", "model": "3000GT", "model_year": 1999, "vin": MITSUBISHI },
        doc! { "make": "Nissan", "model": "Quest", "model_year": 1994, "vin": NISSAN },
        doc! { "make": "Chevrolet", "model": "Aveo", "model_year": 2006, "vin": CHEVROLET },
        doc! { "make": "Subaru", "model": "Impreza", "model_year": 1994, "vin": SUBARU },
    ]
}

pub fn car(vin: &str) -> Document {
    cars()
        .into_iter()
        .find(|car| car.get_str(CARS_ID_KEY).ok() == Some(vin))
        .unwrap()
}

pub fn vins(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .map(|document| document.get_str(CARS_ID_KEY).unwrap().to_string())
        .collect()
}

pub fn finder_options() -> MangoFinderOptions {
    MangoFinderOptions::default()
        .with_id_key(CARS_ID_KEY)
        .with_collection(cars())
}

pub fn repo_options() -> MangoRepoOptions {
    MangoRepoOptions::default()
        .with_id_key(CARS_ID_KEY)
        .with_collection(cars())
}
