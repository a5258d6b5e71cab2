//! Spreadsheet viewer core. [`session::TableSession`] loads CSV, XLS and XLSX
//! content and keeps the filtered and sorted view of it, the remaining modules
//! make up the terminal front end.

pub mod codec;
pub mod controller;
pub mod domain;
pub mod export;
pub mod inputter;
pub mod logging;
pub mod model;
pub mod session;
pub mod source;
pub mod table;
pub mod ui;
