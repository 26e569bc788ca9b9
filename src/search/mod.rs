mod index;

pub use index::TextIndex;
