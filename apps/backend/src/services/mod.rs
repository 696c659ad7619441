//! Backend services

pub mod covers;
pub mod db_sync;
pub mod storage;
pub mod sync_state;
