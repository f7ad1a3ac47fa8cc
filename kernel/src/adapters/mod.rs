// History Adapters
//
// History sources backed by external version-control tools.

pub mod git;
