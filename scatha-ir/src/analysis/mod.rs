//! Analyses over the IR: dominance, loops, call graph, liveness, pointer
//! facts.

mod callgraph;
mod domtree;
mod liveness;
mod loops;
mod pointer_info;

pub use callgraph::CallGraph;
pub use domtree::DomTree;
pub use liveness::{LiveSet, LiveSets};
pub use loops::{Loop, LoopForest};
pub use pointer_info::{PointerAnalysis, PointerInfo, Provenance};
