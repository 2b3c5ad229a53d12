//! Command handlers. Each one runs against a mounted session.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use tracing::{debug, info};

use eduhub_core::api::{ApiClient, Backend};
use eduhub_core::auth::{token_store, AuthorizationGate, GateDecision, SessionManager};
use eduhub_core::catalog::{self, MaterialCard, Page, PAGE_SIZE};
use eduhub_core::config::Config;
use eduhub_core::favorites::FavoritesCache;
use eduhub_core::feedback::{self, RatingSummary};
use eduhub_core::models::{
    MaterialQuery, NewMaterial, RegisterForm, RegisterOutcome, UploadFile,
    UserProfile,
};
use eduhub_core::video;

use crate::{Command, CommentCommand, MaterialsArgs};

/// What anonymous users are told to run
const LOGIN_HINT: &str = "eduhub login";

pub(crate) struct Context {
    config: Config,
    api: Arc<ApiClient>,
    session: Arc<SessionManager>,
    favorites: FavoritesCache,
}

impl Context {
    /// Load configuration, open the token store and restore the session.
    pub(crate) async fn open(api_url: Option<String>) -> Result<Self> {
        let mut config = Config::load().context("Failed to load configuration")?;
        if let Some(url) = api_url {
            config.api_url = Some(url);
        }

        let api = Arc::new(ApiClient::new(config.api_url()).context("Failed to create HTTP client")?);
        let cache_dir = config.cache_dir()?;
        let store = token_store::open(config.token_store, &cache_dir);
        debug!(api_url = api.base_url(), store = %config.token_store, "Opening session");

        let session = Arc::new(SessionManager::new(api.clone(), store));
        session.mount().await;
        let favorites = FavoritesCache::new(api.clone(), session.subscribe_token());

        Ok(Self { config, api, session, favorites })
    }

    /// Run the authorization gate; anonymous users get pointed at `login`.
    async fn require_user(&self) -> Result<UserProfile> {
        let gate = AuthorizationGate::new(LOGIN_HINT);
        let mut states = self.session.subscribe_state();
        match gate.wait_for_decision(&mut states).await {
            GateDecision::Allow(user) => Ok(user),
            GateDecision::Redirect(destination) => bail!("Not signed in. Run `{}` first.", destination),
            GateDecision::Pending => bail!("Session could not be restored"),
        }
    }

    /// The confirmed access token of a signed-in user.
    async fn require_token(&self) -> Result<String> {
        self.require_user().await?;
        self.session
            .access_token()
            .ok_or_else(|| anyhow::anyhow!("Not signed in. Run `{}` first.", LOGIN_HINT))
    }
}

pub(crate) async fn run(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Login { email } => login(ctx, email).await,
        Command::Logout => {
            ctx.session.logout();
            println!("Signed out.");
            Ok(())
        }
        Command::Whoami { json } => whoami(ctx, json).await,
        Command::Register { email, first_name, last_name, captcha } => {
            register(ctx, email, first_name, last_name, captcha).await
        }
        Command::ForgotPassword { email } => {
            ctx.api
                .request_password_reset(email.trim())
                .await
                .context("Failed to request a password reset")?;
            println!("If an account exists for {}, a reset link is on its way.", email.trim());
            Ok(())
        }
        Command::ResetPassword { uid, token } => {
            let password = prompt_new_password()?;
            ctx.api
                .confirm_password_reset(&uid, &token, &password)
                .await
                .context("Failed to reset password")?;
            println!("Password updated. You can sign in now.");
            Ok(())
        }
        Command::VerifyEmail { uid, token } => {
            ctx.api
                .verify_email(&uid, &token)
                .await
                .context("Failed to verify email")?;
            println!("Email verified.");
            Ok(())
        }
        Command::Materials(args) => materials(ctx, args).await,
        Command::Show { id, json } => show(ctx, id, json).await,
        Command::Upload { title, description, kind, file, video_url } => {
            let file = file
                .as_deref()
                .map(UploadFile::from_path)
                .transpose()?;
            let material = NewMaterial { title, description, kind, file, video_url };
            upload(ctx, material).await
        }
        Command::Delete { id } => delete(ctx, id).await,
        Command::Favorites { page } => favorites(ctx, page).await,
        Command::Fav { id } => {
            ctx.require_user().await?;
            match ctx.favorites.add_to_favorites(id).await? {
                Some(entry) => println!("Material {} is in your favorites (added {}).", id, entry.added_at.format("%Y-%m-%d")),
                None => bail!("Not signed in. Run `{}` first.", LOGIN_HINT),
            }
            Ok(())
        }
        Command::Unfav { id } => {
            ctx.require_user().await?;
            if ctx.favorites.remove_from_favorites(id).await? {
                println!("Removed material {} from your favorites.", id);
            } else {
                println!("Material {} was not in your favorites.", id);
            }
            Ok(())
        }
        Command::Rate { id, score } => {
            ctx.require_user().await?;
            let rating = feedback::rate(&ctx.session, &*ctx.api, id, score).await?;
            println!("Rated material {} with {} {}.", id, rating.score, stars(rating.score));
            Ok(())
        }
        Command::Comments { id } => comments(ctx, id).await,
        Command::Comment(command) => comment(ctx, command).await,
    }
}

// ============================================================================
// Account
// ============================================================================

fn prompt_line(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_new_password() -> Result<String> {
    let password = rpassword::prompt_password("New password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    Ok(password)
}

async fn login(ctx: &Context, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| ctx.config.last_email.clone()) {
        Some(email) => email,
        None => prompt_line("Email: ")?,
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", email))?;

    let user = ctx.session.login_user(email.trim(), &password).await?;
    info!(user_id = user.id, "Signed in");

    Config::remember_email(&user.email).context("Failed to save configuration")?;

    println!("Signed in as {}.", user.display_name());
    Ok(())
}

async fn whoami(ctx: &Context, json: bool) -> Result<()> {
    ctx.require_user().await?;
    let Some(user) = ctx.session.refresh_profile().await.user().cloned() else {
        bail!("Your session has expired. Run `{}` again.", LOGIN_HINT);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
        return Ok(());
    }

    println!("{} <{}>", user.display_name(), user.email);
    if let Some(joined) = user.date_joined {
        println!("Member since {}", joined.format("%Y-%m-%d"));
    }
    if let Some(stats) = &user.statistics {
        println!(
            "Materials: {}  Favorites: {}  Comments: {}  Ratings: {}",
            stats.materials_uploaded, stats.favorites, stats.comments, stats.ratings
        );
    }
    if let Some(activity) = &user.recent_activity {
        for material in &activity.materials {
            println!("  uploaded  {} ({})", material.title, material.kind);
        }
        for comment in &activity.comments {
            println!("  commented on {}: {}", comment.material_title, comment.text);
        }
        for rating in &activity.ratings {
            println!("  rated {} {}", rating.material_title, stars(rating.score));
        }
    }
    Ok(())
}

async fn register(
    ctx: &Context,
    email: String,
    first_name: String,
    last_name: String,
    captcha: String,
) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm_password = rpassword::prompt_password("Confirm password: ")?;
    let form = RegisterForm {
        first_name,
        last_name,
        email,
        password,
        confirm_password,
        recaptcha_token: captcha,
    };

    let request = match form.validate() {
        Ok(request) => request,
        Err(errors) => {
            for (field, messages) in &errors {
                eprintln!("{}: {}", field, messages.join(" "));
            }
            bail!("Registration form is incomplete");
        }
    };

    let outcome = ctx.session.register_user(&request).await?;
    match &outcome {
        RegisterOutcome::Created(user) => {
            println!("Account created for {}. Check your inbox to verify it, then sign in.", user.email);
            Ok(())
        }
        RegisterOutcome::Rejected(_) => {
            let summary = outcome.rejection_summary().unwrap_or_default();
            bail!("Registration rejected: {}", summary)
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

fn stars(score: u8) -> String {
    let filled = usize::from(score.min(feedback::MAX_SCORE));
    format!("{}{}", "★".repeat(filled), "☆".repeat(usize::from(feedback::MAX_SCORE) - filled))
}

fn print_cards(page: &Page<MaterialCard>, favorites: &FavoritesCache) {
    if page.items.is_empty() {
        println!("No materials found.");
        return;
    }
    for card in &page.items {
        let marker = if favorites.is_favorite(card.id) { "♥" } else { " " };
        println!(
            "{} #{:<5} {:<40} {:<12} {} ({})  by {}",
            marker,
            card.id,
            card.title,
            card.kind.to_string(),
            card.rating_label(),
            card.ratings_count,
            card.author
        );
    }
    println!("Page {} of {} ({} materials)", page.page, page.total_pages, page.total_items);
}

async fn materials(ctx: &Context, args: MaterialsArgs) -> Result<()> {
    let author = if args.mine {
        Some(ctx.require_user().await?.email)
    } else {
        args.author
    };
    let query = MaterialQuery {
        kind: args.kind.clone(),
        author,
        ordering: args.sort,
        created_from: args.from,
        created_to: args.to,
    };

    let token = ctx.session.access_token();
    let materials = ctx
        .api
        .list_materials(&query, token.as_deref())
        .await
        .context("Failed to list materials")?;
    ctx.favorites.sync().await;

    let cards = materials.iter().map(MaterialCard::from_material).collect();
    let cards = catalog::filter_and_sort(cards, &args.search, args.kind.as_ref(), args.sort);
    print_cards(&Page::of(cards, args.page, PAGE_SIZE), &ctx.favorites);
    Ok(())
}

async fn show(ctx: &Context, id: i64, json: bool) -> Result<()> {
    let token = ctx.session.access_token();
    let material = catalog::fetch_material(&*ctx.api, token.as_deref(), id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&material)?);
        return Ok(());
    }

    let ratings = ctx.api.list_ratings(token.as_deref(), id).await?;
    let me = ctx.session.user().map(|u| u.email);
    let summary = RatingSummary::from_ratings(&ratings, me.as_deref());
    ctx.favorites.sync().await;

    let card = MaterialCard::from_material(&material);
    println!("#{} {} ({})", card.id, card.title, card.kind);
    println!("by {}", card.author);
    if let Some(created) = card.created_at {
        println!("Published {}", created.format("%Y-%m-%d"));
    }
    if !card.description.is_empty() {
        println!("\n{}\n", card.description);
    }
    if let Some(url) = &card.video_url {
        println!("Watch: {}", video::embed_url(url));
    }
    if let Some(url) = &card.download_url {
        println!("Download: {}", url);
    }
    if let Some(thumbnail) = &card.thumbnail {
        println!("Thumbnail: {}", thumbnail);
    }
    println!("Rating: {} from {} ratings", summary.display_average(), summary.count);
    if let Some(mine) = summary.mine {
        println!("Your rating: {}", stars(mine));
    }
    if ctx.favorites.is_favorite(id) {
        println!("♥ In your favorites");
    }
    Ok(())
}

async fn upload(ctx: &Context, material: NewMaterial) -> Result<()> {
    let token = ctx.require_token().await?;
    material.validate().map_err(|e| anyhow::anyhow!("Invalid upload: {}", e))?;

    let created = ctx
        .api
        .upload_material(&token, &material)
        .await
        .context("Failed to upload material")?;
    println!("Uploaded material #{}: {}", created.id, created.title);
    Ok(())
}

async fn delete(ctx: &Context, id: i64) -> Result<()> {
    let user = ctx.require_user().await?;
    let token = ctx.require_token().await?;
    let material = catalog::fetch_material(&*ctx.api, Some(&token), id).await?;
    if !material.is_owned_by(&user.email) {
        bail!("Material {} belongs to someone else", id);
    }

    ctx.api
        .delete_material(&token, id)
        .await
        .context("Failed to delete material")?;
    println!("Deleted material #{}: {}", id, material.title);
    Ok(())
}

async fn favorites(ctx: &Context, page: usize) -> Result<()> {
    let token = ctx.require_token().await?;
    ctx.favorites.sync().await;

    let entries = ctx.favorites.entries();
    let materials = catalog::resolve_favorites(&*ctx.api, Some(&token), &entries).await;
    let cards = materials.iter().map(MaterialCard::from_material).collect();
    print_cards(&Page::of(cards, page, PAGE_SIZE), &ctx.favorites);
    Ok(())
}

// ============================================================================
// Comments
// ============================================================================

async fn comments(ctx: &Context, id: i64) -> Result<()> {
    let token = ctx.session.access_token();
    let comments = ctx
        .api
        .list_comments(token.as_deref(), id)
        .await
        .context("Failed to load comments")?;
    if comments.is_empty() {
        println!("No comments yet.");
        return Ok(());
    }

    let me = ctx.session.user();
    for comment in &comments {
        let author = comment
            .author_name
            .as_deref()
            .or(comment.author_email.as_deref())
            .unwrap_or("Unknown");
        let date = comment
            .date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let yours = match &me {
            Some(user) if comment.is_authored_by(&user.email) => " (you)",
            _ => "",
        };
        println!("[{}] {}{} {}", comment.id, author, yours, date);
        println!("    {}", comment.text);
    }
    Ok(())
}

async fn comment(ctx: &Context, command: CommentCommand) -> Result<()> {
    let token = ctx.require_token().await?;
    match command {
        CommentCommand::Add { material, text } => {
            let text = feedback::comment_text(&text)?;
            let comment = ctx
                .api
                .add_comment(&token, material, text)
                .await
                .context("Failed to add comment")?;
            println!("Comment #{} added.", comment.id);
        }
        CommentCommand::Edit { comment, text } => {
            let text = feedback::comment_text(&text)?;
            ctx.api
                .update_comment(&token, comment, text)
                .await
                .context("Failed to edit comment (only its author can)")?;
            println!("Comment #{} updated.", comment);
        }
        CommentCommand::Delete { comment } => {
            ctx.api
                .delete_comment(&token, comment)
                .await
                .context("Failed to delete comment (only its author can)")?;
            println!("Comment #{} deleted.", comment);
        }
    }
    Ok(())
}
