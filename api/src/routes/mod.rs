pub mod document_imports;
pub mod health;
