// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
mod calculator;
mod search_documents;
mod update_context;

pub use calculator::CalculatorTool;
pub use search_documents::{DocumentHit, DocumentSearcher, SearchDocumentsTool};
pub use update_context::{ContextSink, UpdateContextTool};
