use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use eclat_contracts::chat::{parse_intent, ChatRole, ChatTurn, Intent, CHAT_HELP_COMMANDS};
use eclat_contracts::events::EventWriter;
use eclat_contracts::menu::{default_menu, filter_menu, find_item, Category, MenuItem};
use eclat_engine::{
    default_provider_registry, new_session_id, ApiKeySlot, DishRecommendation, EngineConfig,
    GenerationError, GenerationSession, ImageOutcome, ImageRef, KeySlotAuthority,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DRYRUN_TEXT_MODEL: &str = "dryrun-text-1";
const DRYRUN_IMAGE_MODEL: &str = "dryrun-image-1";
const PROGRESS_POLL: Duration = Duration::from_millis(200);

type ImageWorker = JoinHandle<Result<ImageOutcome, GenerationError>>;

#[derive(Debug, Parser)]
#[command(name = "eclat", version, about = "L'Éclat de Saveurs concierge and dish imagery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Generate(GenerateArgs),
    Recommend(RecommendArgs),
    Menu(MenuArgs),
}

#[derive(Debug, Args)]
struct EngineArgs {
    /// Use the offline providers; no API key needed.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long, default_value = "eclat-out")]
    out: PathBuf,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    dish: String,
    #[arg(long, default_value = "eclat-out")]
    out: PathBuf,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct RecommendArgs {
    #[arg(long)]
    mood: String,
    #[arg(long, default_value = "")]
    prefs: String,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct MenuArgs {
    #[arg(long)]
    category: Option<String>,
    #[arg(long, default_value = "")]
    query: String,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("eclat error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
        Command::Recommend(args) => run_recommend(args),
        Command::Menu(args) => run_menu(args),
    }
}

fn engine_config(args: &EngineArgs) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if args.dryrun {
        config.text_model = Some(DRYRUN_TEXT_MODEL.to_string());
        config.image_model = Some(DRYRUN_IMAGE_MODEL.to_string());
    }
    if let Some(model) = args.text_model.as_ref() {
        config.text_model = Some(model.clone());
    }
    if let Some(model) = args.image_model.as_ref() {
        config.image_model = Some(model.clone());
    }
    config
}

fn build_session(args: &EngineArgs, events_path: Option<PathBuf>) -> Result<Arc<GenerationSession>> {
    let config = engine_config(args);
    let slot = ApiKeySlot::from_env();
    if args.dryrun && !slot.is_set() {
        slot.set("dryrun");
    }
    let providers = default_provider_registry(&config, slot.clone())?;
    let events = events_path.map(|path| EventWriter::to_file(path, new_session_id()));
    let session = GenerationSession::from_config(
        &config,
        &providers,
        Some(Arc::new(terminal_authority(slot))),
        events,
    )?;
    tracing::info!(
        session_id = session.session_id(),
        text_model = %session.dispatcher().text_model().name,
        image_model = %session.dispatcher().image_model().name,
        "session ready"
    );
    Ok(Arc::new(session))
}

/// Key selection through a terminal prompt. Only the thread that built the
/// authority may prompt; other threads defer to the `/key` command.
fn terminal_authority(slot: ApiKeySlot) -> KeySlotAuthority {
    let prompt_thread = thread::current().id();
    KeySlotAuthority::new(slot, move || {
        if thread::current().id() != prompt_thread {
            eprintln!("\nClé API à re-sélectionner : tapez /key.");
            return Ok(None);
        }
        prompt_for_key()
    })
}

fn prompt_for_key() -> Result<Option<String>> {
    print!("Clé API Gemini (vide pour annuler) : ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read API key")?;
    let key = line.trim();
    Ok((!key.is_empty()).then(|| key.to_string()))
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events_path = args
        .engine
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let session = build_session(&args.engine, Some(events_path))?;
    let menu = default_menu();
    let mut workers: Vec<(String, ImageWorker)> = Vec::new();

    if let Some(greeting) = session.chat_transcript().first() {
        println!("{}", format_turn(greeting));
    }
    println!("Tapez /help pour la liste des commandes.");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        reap_finished(&mut workers);
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if handle_intent(&session, &menu, &args.out, &mut workers, &intent) == ChatStep::Quit {
            break;
        }
    }

    if !workers.is_empty() {
        println!("En attente des générations en cours...");
    }
    for (key, worker) in workers {
        report_worker(&key, worker);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatStep {
    Continue,
    Quit,
}

/// Runs one chat-loop command. Command failures are reported and the loop
/// carries on; only `/quit` ends it.
fn handle_intent(
    session: &Arc<GenerationSession>,
    menu: &[MenuItem],
    out_dir: &Path,
    workers: &mut Vec<(String, ImageWorker)>,
    intent: &Intent,
) -> ChatStep {
    match intent.action.as_str() {
        "noop" => {}
        "help" => println!("Commandes : {}", CHAT_HELP_COMMANDS.join("  ")),
        "list_menu" => {
            let category = intent.arg_str("category").and_then(Category::parse);
            let query = intent.arg_str("query").unwrap_or_default();
            print_menu(&filter_menu(menu, category, query), Some(session.as_ref()));
        }
        "generate_image" => {
            let Some(key) = intent.arg_str("key") else {
                println!("Usage : /dish <id>");
                return ChatStep::Continue;
            };
            let Some(item) = find_item(menu, key) else {
                println!("Plat inconnu : {key}");
                return ChatStep::Continue;
            };
            if let Some(worker) = start_generation(session, item) {
                workers.push((item.id.clone(), worker));
            }
        }
        "save_image" => {
            let Some(key) = intent.arg_str("key") else {
                println!("Usage : /save <id>");
                return ChatStep::Continue;
            };
            match session.image_for(key) {
                Some(image) => match write_image(out_dir, key, &image) {
                    Ok(path) => println!("Image enregistrée : {}", path.display()),
                    Err(err) => eprintln!("eclat: {err:#}"),
                },
                None => println!("Aucune image générée pour {key}."),
            }
        }
        "acquire_credential" => {
            if session.request_credential() {
                println!("Clé sélectionnée.");
            } else {
                println!("Aucune clé disponible.");
            }
        }
        "status" => print_status(session),
        "recommend" => {
            let mood = intent.arg_str("mood").unwrap_or_default();
            let prefs = intent.arg_str("prefs").unwrap_or_default();
            if mood.is_empty() {
                println!("Usage : /recommend <humeur> | <préférences>");
                return ChatStep::Continue;
            }
            print_recommendation(session.recommend_dish(mood, prefs).as_ref());
        }
        "history" => {
            for turn in session.chat_transcript() {
                println!("{}", format_turn(&turn));
            }
        }
        "quit" => return ChatStep::Quit,
        "chat" => {
            let message = intent.message.as_deref().unwrap_or_default();
            match session.send_chat_message(message) {
                Ok(turn) => println!("{}", format_turn(&turn)),
                Err(err) => println!("{}", err.user_notice()),
            }
        }
        _ => {
            let command = intent.arg_str("command").unwrap_or_default();
            println!("Commande inconnue : /{command}. Tapez /help.");
        }
    }
    ChatStep::Continue
}

/// Acquire the credential on this thread if needed, then hand the request
/// to a worker.
fn start_generation(session: &Arc<GenerationSession>, item: &MenuItem) -> Option<ImageWorker> {
    if session.is_generating(&item.id) {
        println!("{} est déjà en préparation.", item.name);
        return None;
    }
    if !session.has_credential() && !session.request_credential() {
        println!("Sélectionnez d'abord une clé API (/key).");
        return None;
    }
    match session.spawn_dish_image(&item.id, &item.generation_prompt) {
        Ok(worker) => {
            println!("Génération lancée pour {} ({}).", item.name, item.id);
            Some(worker)
        }
        Err(err) => {
            eprintln!("eclat: {err:#}");
            None
        }
    }
}

fn reap_finished(workers: &mut Vec<(String, ImageWorker)>) {
    let mut pending = Vec::with_capacity(workers.len());
    for (key, worker) in workers.drain(..) {
        if worker.is_finished() {
            report_worker(&key, worker);
        } else {
            pending.push((key, worker));
        }
    }
    *workers = pending;
}

fn report_worker(key: &str, worker: ImageWorker) {
    match worker.join() {
        Ok(result) => println!("{}", describe_outcome(key, &result)),
        Err(_) => eprintln!("eclat: image worker for {key} panicked"),
    }
}

fn describe_outcome(key: &str, result: &Result<ImageOutcome, GenerationError>) -> String {
    match result {
        Ok(ImageOutcome::Generated(image)) => format!(
            "Image prête pour {key} ({}, {} octets). /save {key} pour l'enregistrer.",
            image.mime_type(),
            image.bytes().len()
        ),
        Ok(ImageOutcome::NoContent) => format!("Aucune image produite pour {key}."),
        Ok(ImageOutcome::AlreadyInProgress) => format!("{key} est déjà en préparation."),
        Ok(ImageOutcome::CredentialRequired { acquired: true }) => {
            format!("Clé sélectionnée ; relancez /dish {key}.")
        }
        Ok(ImageOutcome::CredentialRequired { acquired: false }) => {
            "Sélectionnez d'abord une clé API (/key).".to_string()
        }
        Err(err) => format!("{key} : {}", err.user_notice()),
    }
}

fn print_status(session: &GenerationSession) {
    let busy = session.in_flight_keys();
    if busy.is_empty() {
        println!("Aucune génération en cours.");
    } else {
        println!("En préparation : {}", busy.join(", "));
    }
    if let Some(phrase) = session.narration() {
        println!("  {phrase}");
    }
    if let Some(notice) = session.last_notice() {
        println!("Dernier message : {notice}");
    }
    let cached = session.cached_keys();
    if !cached.is_empty() {
        println!("Images générées : {}", cached.join(", "));
    }
    println!(
        "Clé API : {}",
        if session.has_credential() {
            "sélectionnée"
        } else {
            "absente"
        }
    );
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let menu = default_menu();
    let Some(item) = find_item(&menu, &args.dish) else {
        bail!("unknown dish '{}'", args.dish);
    };
    let events_path = args
        .engine
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let session = build_session(&args.engine, Some(events_path))?;
    if !session.has_credential() && !session.request_credential() {
        eprintln!("Aucune clé API disponible.");
        return Ok(1);
    }

    let worker = session.spawn_dish_image(&item.id, &item.generation_prompt)?;
    let mut last_phrase: Option<String> = None;
    while !worker.is_finished() {
        let phrase = session.narration();
        if phrase.is_some() && phrase != last_phrase {
            if let Some(text) = phrase.as_deref() {
                eprintln!("{text}");
            }
            last_phrase = phrase;
        }
        thread::sleep(PROGRESS_POLL);
    }
    let result = match worker.join() {
        Ok(result) => result,
        Err(_) => bail!("image worker for {} panicked", item.id),
    };

    match result {
        Ok(ImageOutcome::Generated(image)) => {
            let path = write_image(&args.out, &item.id, &image)?;
            println!("{}", path.display());
            Ok(0)
        }
        other => {
            eprintln!("{}", describe_outcome(&item.id, &other));
            Ok(1)
        }
    }
}

fn run_recommend(args: RecommendArgs) -> Result<i32> {
    let session = build_session(&args.engine, args.engine.events.clone())?;
    let recommendation = session.recommend_dish(&args.mood, &args.prefs);
    print_recommendation(recommendation.as_ref());
    Ok(if recommendation.is_some() { 0 } else { 1 })
}

fn run_menu(args: MenuArgs) -> Result<i32> {
    let category = match args.category.as_deref() {
        Some(raw) => match Category::parse(raw) {
            Some(category) => Some(category),
            None => {
                let known: Vec<&str> = Category::ALL
                    .iter()
                    .map(|category| category.as_str())
                    .collect();
                bail!("unknown category '{raw}' (expected one of: {})", known.join(", "))
            }
        },
        None => None,
    };
    let menu = default_menu();
    print_menu(&filter_menu(&menu, category, &args.query), None);
    Ok(0)
}

fn print_menu(items: &[&MenuItem], session: Option<&GenerationSession>) {
    if items.is_empty() {
        println!("Aucun plat ne correspond.");
        return;
    }
    for item in items {
        let mut badges = Vec::new();
        if item.is_vegetarian {
            badges.push("végétarien");
        }
        if let Some(session) = session {
            if session.is_generating(&item.id) {
                badges.push("en préparation");
            } else if session.image_for(&item.id).is_some() {
                badges.push("image IA");
            }
        }
        let suffix = if badges.is_empty() {
            String::new()
        } else {
            format!(" [{}]", badges.join(", "))
        };
        println!(
            "{:<7} {:<10} {:>7.2} €  {}{suffix}",
            item.id,
            item.category.as_str(),
            item.price,
            item.name
        );
    }
}

fn print_recommendation(recommendation: Option<&DishRecommendation>) {
    match recommendation {
        Some(rec) => {
            println!("Plat : {}", rec.dish_type);
            println!("Saveurs : {}", rec.flavor_profile);
            println!("Pourquoi : {}", rec.reasoning);
        }
        None => println!("Aucune recommandation disponible pour le moment."),
    }
}

fn format_turn(turn: &ChatTurn) -> String {
    let speaker = match turn.role {
        ChatRole::User => "Vous",
        ChatRole::Assistant => "Majordome",
    };
    format!("{speaker} : {}", turn.text)
}

fn write_image(out_dir: &Path, key: &str, image: &ImageRef) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(format!("{key}.{}", image.extension()));
    fs::write(&path, image.bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::Parser;
    use eclat_contracts::chat::{parse_intent, ChatTurn};
    use eclat_contracts::menu::default_menu;
    use eclat_engine::{
        default_provider_registry, ApiKeySlot, EngineConfig, GenerationError,
        GenerationSession, ImageOutcome, ImageRef, KeySlotAuthority,
    };

    use super::{
        describe_outcome, format_turn, handle_intent, write_image, ChatStep, Cli, Command,
        DRYRUN_IMAGE_MODEL, DRYRUN_TEXT_MODEL,
    };

    fn dryrun_session() -> anyhow::Result<Arc<GenerationSession>> {
        let slot = ApiKeySlot::new();
        slot.set("dryrun");
        let config = EngineConfig {
            text_model: Some(DRYRUN_TEXT_MODEL.to_string()),
            image_model: Some(DRYRUN_IMAGE_MODEL.to_string()),
            ..EngineConfig::default()
        };
        let providers = default_provider_registry(&config, slot.clone())?;
        let authority = KeySlotAuthority::new(slot, || Ok(None));
        Ok(Arc::new(GenerationSession::from_config(
            &config,
            &providers,
            Some(Arc::new(authority)),
            None,
        )?))
    }

    #[test]
    fn generate_flags_parse() {
        let cli = Cli::parse_from([
            "eclat", "generate", "--dish", "dish-7", "--dryrun", "--out", "/tmp/out",
        ]);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.dish, "dish-7");
        assert!(args.engine.dryrun);
        assert!(args.engine.image_model.is_none());
    }

    #[test]
    fn outcomes_render_user_notices() {
        let failed: Result<ImageOutcome, GenerationError> = Err(GenerationError::CredentialInvalid {
            message: "not found".to_string(),
        });
        assert!(describe_outcome("dish-3", &failed).contains("Clé API invalide"));

        let ready = Ok(ImageOutcome::Generated(ImageRef::new(vec![1, 2], None)));
        assert!(describe_outcome("dish-3", &ready).contains("/save dish-3"));
    }

    #[test]
    fn turns_are_labelled_by_speaker() {
        assert_eq!(format_turn(&ChatTurn::user("Bonsoir")), "Vous : Bonsoir");
        assert_eq!(
            format_turn(&ChatTurn::assistant("Bienvenue")),
            "Majordome : Bienvenue"
        );
    }

    #[test]
    fn images_are_written_with_their_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = ImageRef::new(vec![0xFF, 0xD8], Some("image/jpeg"));
        let path = write_image(&temp.path().join("nested"), "dish-1", &image)?;
        assert!(path.ends_with("dish-1.jpg"));
        assert_eq!(std::fs::read(path)?, vec![0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn failed_save_keeps_the_chat_running() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"occupied")?;

        let session = dryrun_session()?;
        let menu = default_menu();
        let mut workers = Vec::new();
        session.generate_dish_image("dish-1", "Saint-Jacques")?;
        assert!(session.image_for("dish-1").is_some());

        let step = handle_intent(
            &session,
            &menu,
            &blocker.join("out"),
            &mut workers,
            &parse_intent("/save dish-1"),
        );
        assert_eq!(step, ChatStep::Continue);

        let step = handle_intent(
            &session,
            &menu,
            &temp.path().join("out"),
            &mut workers,
            &parse_intent("/save dish-1"),
        );
        assert_eq!(step, ChatStep::Continue);
        assert!(temp.path().join("out").read_dir()?.next().is_some());
        Ok(())
    }

    #[test]
    fn only_quit_ends_the_chat() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let session = dryrun_session()?;
        let menu = default_menu();
        let mut workers = Vec::new();
        for line in ["/dish nope", "/save dish-9", "/frobnicate", "/status"] {
            let step = handle_intent(&session, &menu, temp.path(), &mut workers, &parse_intent(line));
            assert_eq!(step, ChatStep::Continue, "{line}");
        }
        assert!(workers.is_empty());
        let step = handle_intent(&session, &menu, temp.path(), &mut workers, &parse_intent("/quit"));
        assert_eq!(step, ChatStep::Quit);
        Ok(())
    }
}
