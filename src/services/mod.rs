pub mod dispatcher;
pub mod storage_service;
pub mod upload_lock;
pub mod upload_storage;
