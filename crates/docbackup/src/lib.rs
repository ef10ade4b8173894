//! docbackup - back up, restore and tail a partitioned document store
//!
//! # Usage
//!
//! ```bash
//! # Export every collection to ./backup/<collection>.jsonbak
//! docbackup -f ./backup -c "$CONN" -d orders backup
//!
//! # Import the files again, partitioned on /tenant
//! docbackup -f ./backup -c "$CONN" -d orders restore -p tenant -k unknown
//!
//! # Stream changes from now on until Ctrl+C, rediscovering ranges every 60 waits
//! docbackup -f ./feed -c "$CONN" -d orders feed -w 1000 -r 60
//! ```

pub mod backup;
pub mod cli;
pub mod feed;
pub mod operation;
pub mod restore;

pub use operation::Operation;
