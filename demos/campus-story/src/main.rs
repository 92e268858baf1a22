use std::sync::Arc;
use std::time::Duration;

use storygate::prelude::*;

// ---------------------------------------------------------------------------
// Story
// ---------------------------------------------------------------------------

const MOVE_IN: PageId = PageId(1);
const FIRST_WEEK: PageId = PageId(2);
const MIDTERMS: PageId = PageId(3);
const DEANS_LIST: PageId = PageId(4);
const HOMECOMING: PageId = PageId(5);
const PROBATION: PageId = PageId(6);
const GRADUATION: PageId = PageId(7);

const MIDTERMS_SCRIPT: &str = r#"
addKnowledge(1)
if knowledge() >= 5 then
    jump(4)
elseif flagCheck("joined_band") then
    setFlag("on_tour")
    jump(5)
else
    jump(6)
end
"#;

/// Four years of college in seven pages.
fn campus() -> MemoryStore {
    let store = MemoryStore::new(MOVE_IN);

    store.insert_page(
        Page::linear(MOVE_IN, "Move-in day. Your roommate has brought a drum kit.", Some(FIRST_WEEK))
            .with_year(1),
    );
    store.insert_page(
        Page::question(FIRST_WEEK, "The first Friday night of term. Where do you go?", Some(MIDTERMS))
            .with_year(1),
    );
    store.insert_page(Page::jumper(MIDTERMS, "Midterms arrive.", MIDTERMS_SCRIPT).with_year(2));
    store.insert_page(
        Page::linear(DEANS_LIST, "Your name is on the dean's list.", Some(GRADUATION)).with_year(2),
    );
    store.insert_page(
        Page::linear(HOMECOMING, "The band headlines homecoming.", Some(GRADUATION)).with_year(3),
    );
    store.insert_page(
        Page::linear(PROBATION, "A letter about academic probation.", Some(GRADUATION)).with_year(3),
    );
    store.insert_page(Page::linear(GRADUATION, "Graduation day.", None).with_year(4));

    store.insert_answer(
        Answer::new(AnswerId(1), FIRST_WEEK, "The library")
            .with_delta(Stat::Knowledge, 5)
            .with_delta(Stat::Soberness, 1),
    );
    store.insert_answer(
        Answer::new(AnswerId(2), FIRST_WEEK, "Band rehearsal")
            .with_delta(Stat::Performance, 3)
            .with_delta(Stat::Connections, 2)
            .with_flag("joined_band"),
    );
    store.insert_answer(
        Answer::new(AnswerId(3), FIRST_WEEK, "The party on fraternity row")
            .with_delta(Stat::Connections, 3)
            .with_delta(Stat::Soberness, -2)
            .with_flag("party_animal"),
    );

    store
}

/// Registers the demo player and returns a fresh session token for them.
async fn seed_player(
    store: &MemoryStore,
    tokens: &MemoryTokenStore,
    ttl: Duration,
) -> Result<String, StoreError> {
    let player = store.create_player("freshman", "not-a-real-hash").await?;
    issue_token(tokens, player.id, ttl).await
}

type CampusServer = StorygateServer<MemoryStore, MemoryTokenStore, LuaScriptEngine, JsonCodec>;

/// Seeds the story and the demo player, then binds the server.
async fn start(addr: &str) -> Result<(CampusServer, String), StorygateError> {
    let session_config = SessionConfig::default();
    let store = Arc::new(campus());
    let tokens = Arc::new(MemoryTokenStore::new());
    let token = seed_player(&store, &tokens, session_config.token_ttl).await?;

    let server = StorygateServer::builder()
        .bind(addr)
        .session_config(session_config)
        .build(store, tokens, LuaScriptEngine::default())
        .await?;
    Ok((server, token))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let verbose = std::env::var("STORYGATE_VERBOSE").is_ok_and(|v| !v.is_empty() && v != "0");
    storygate::init_tracing(verbose);

    let addr = std::env::var("STORYGATE_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let (server, token) = start(&addr).await?;

    let local = server.local_addr()?;
    tracing::info!(addr = %local, %token, "campus story ready");
    eprintln!(r#"connect and send {{"channel":"auth","authToken":"{token}"}}"#);

    server.run().await?;
    Ok(())
}
