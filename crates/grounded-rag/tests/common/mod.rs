//! Shared fixtures: a service wired to deterministic providers

#![allow(dead_code)]

use grounded_rag::evaluation::LexicalJudge;
use grounded_rag::providers::mock::{HashEmbedder, ScriptedGenerator};
use grounded_rag::providers::GenerationProvider;
use grounded_rag::retrieval::InMemoryVectorIndex;
use grounded_rag::storage::RagDatabase;
use grounded_rag::{RagConfig, RagService};
use std::sync::Arc;

pub const DIMENSIONS: usize = 64;

/// Two paragraphs about credit policy, with header lines
pub const CREDIT_POLICY: &str = "Título: Política de Crédito\n\
Categoria: Política de Crédito\n\
\n\
A política de crédito define que o limite de crédito é revisado anualmente pelo comitê de risco.\n\
\n\
Clientes com atraso superior a noventa dias têm o limite de crédito suspenso até a regularização.\n";

pub const OPENING_HOURS: &str = "Título: Horário de Atendimento\n\
Categoria: Atendimento\n\
\n\
As agências abrem às dez horas e fecham às dezesseis horas em dias úteis.\n";

pub fn config() -> RagConfig {
    let mut config = RagConfig::default();
    config.embeddings.dimensions = DIMENSIONS;
    config
}

pub fn service_with(config: RagConfig, llm: Arc<dyn GenerationProvider>) -> RagService {
    RagService::new(
        config,
        Arc::new(HashEmbedder::new(DIMENSIONS)),
        llm,
        Arc::new(InMemoryVectorIndex::new(DIMENSIONS)),
        Arc::new(RagDatabase::in_memory().expect("in-memory database")),
        Arc::new(LexicalJudge::new(0.8)),
    )
}

/// Generator that cites the first prompt chunk
pub fn citing_generator() -> Arc<ScriptedGenerator> {
    Arc::new(ScriptedGenerator::fixed(
        "O limite de crédito é revisado anualmente pelo comitê de risco [1].",
    ))
}
