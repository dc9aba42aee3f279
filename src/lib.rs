// ==============================================================================
// lib.rs - Coloc Results Library
// ==============================================================================
// Description: Library interface for coloc command expansion and results
//              consolidation
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

pub mod commands;
pub mod config;
pub mod models;
pub mod output;
pub mod parsers;
pub mod processor;
pub mod report;
pub mod validator;
