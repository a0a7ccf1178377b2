//! Eviction policies.
//!
//! | Policy     | Module    | Evicts                                        |
//! |------------|-----------|-----------------------------------------------|
//! | FIFO       | `fifo`    | oldest admission                              |
//! | LRU        | `lru`     | least recently used                           |
//! | Clock      | `clock`   | first zero-counter object under the hand      |
//! | Sieve      | `sieve`   | first unvisited object, survivors stay put    |
//! | ARC        | `arc`     | adaptive split between recency and frequency  |
//! | GLCache    | `glcache` | whole segments, merged by learned utility     |

pub mod arc;
pub mod clock;
pub mod core;
pub mod fifo;
pub mod glcache;
pub mod lru;
pub mod sieve;
