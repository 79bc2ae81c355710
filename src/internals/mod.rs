pub mod borrow;
pub mod entity;
pub mod hash;
pub mod insert;
pub mod lookup;
pub mod permissions;
pub mod query;
pub mod storage;
pub mod world;
