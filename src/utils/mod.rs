pub mod soffice;
