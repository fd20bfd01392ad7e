use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::{miette, IntoDiagnostic, Result};
use migration::MigratorTrait;
use tracing_subscriber::{fmt, EnvFilter};

use permit::authz::{
    config, loader, Authority, Context, GrantQuery, GuardRegistry, NewRole, PermitConfig,
    ResourceKey, ResourceMatch, ResourceRecord, Subject,
};
use permit::settings::Settings;
use permit::storage::{self, SeaOrmStore};

#[derive(Parser, Debug)]
#[command(
    name = "permit",
    version,
    about = "Role-grant access control decisions"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "permit.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Manage role definitions
    #[command(subcommand)]
    Role(RoleCommand),
    /// Grant a role to a subject
    Grant(GrantArgs),
    /// Revoke a role from a subject
    Revoke(RevokeArgs),
    /// List grants
    Grants(GrantsArgs),
    /// Load a policy and summarise its rules
    Check(PolicyArg),
    /// Evaluate one action against a policy
    Decide(DecideArgs),
}

#[derive(Subcommand, Debug)]
enum RoleCommand {
    Create {
        key: String,
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Grants may omit the resource
        #[arg(long, conflicts_with = "no_resource")]
        optional_resource: bool,
        /// Grants never name a resource
        #[arg(long)]
        no_resource: bool,
    },
    List,
}

#[derive(Args, Debug)]
struct GrantArgs {
    subject: String,
    role: String,
    /// Resource as `Type/id`
    #[arg(long)]
    resource: Option<String>,
}

#[derive(Args, Debug)]
struct RevokeArgs {
    subject: String,
    role: String,
    /// Resource as `Type/id`
    #[arg(long, conflicts_with = "any")]
    resource: Option<String>,
    /// Revoke the role on every resource
    #[arg(long)]
    any: bool,
}

#[derive(Args, Debug)]
struct GrantsArgs {
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    role: Option<String>,
    /// Resource as `Type/id`
    #[arg(long)]
    resource: Option<String>,
}

#[derive(Args, Debug)]
struct PolicyArg {
    /// Policy file or directory; defaults to `policy.path` from settings
    policy: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DecideArgs {
    #[command(flatten)]
    policy: PolicyArg,
    #[arg(long)]
    action: String,
    #[arg(long, required_unless_present = "guest")]
    subject: Option<String>,
    #[arg(long, conflicts_with = "subject")]
    guest: bool,
    /// Context variable as `name=Type/id`, or `name=` for a nil value
    #[arg(long = "var")]
    vars: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::debug!(?settings, "Loaded configuration");

    match cli.command {
        Command::Migrate => {
            let db = storage::init(&settings.database).await?;
            migration::Migrator::up(&db, None).await.into_diagnostic()?;
            tracing::info!("Migrations applied");
        }
        Command::Role(cmd) => role_command(&settings, cmd).await?,
        Command::Grant(args) => {
            let authority = authority(&settings).await?;
            let resource = args.resource.as_deref().map(parse_resource).transpose()?;
            let created = authority
                .authorize(
                    &Subject::person(args.subject.as_str()),
                    args.role.as_str(),
                    resource.as_ref(),
                )
                .await?;
            println!("{} grant(s) created", created.len());
        }
        Command::Revoke(args) => {
            let authority = authority(&settings).await?;
            let resource = if args.any {
                ResourceMatch::Any
            } else {
                args.resource
                    .as_deref()
                    .map(parse_resource)
                    .transpose()?
                    .into()
            };
            let removed = authority
                .revoke_count(
                    &Subject::person(args.subject.as_str()),
                    args.role.as_str(),
                    resource,
                )
                .await?;
            println!("{removed} grant(s) revoked");
        }
        Command::Grants(args) => {
            let authority = authority(&settings).await?;
            let mut query = GrantQuery::new();
            if let Some(subject) = &args.subject {
                query = query.subject(&Subject::person(subject.as_str()));
            }
            if let Some(role) = args.role {
                query = query.roles(role);
            }
            if let Some(resource) = args.resource.as_deref() {
                query = query.resource(parse_resource(resource)?);
            }
            let roles = authority.list_roles().await?;
            for grant in authority.grants(&query).await? {
                let key = roles
                    .iter()
                    .find(|r| r.id == grant.role_id)
                    .map_or("?", |r| r.key.as_str());
                match grant.resource() {
                    Some(resource) => println!("{}\t{key}\t{resource}", grant.subject_id),
                    None => println!("{}\t{key}\t-", grant.subject_id),
                }
            }
        }
        Command::Check(arg) => {
            let path = policy_path(&settings, arg.policy)?;
            let pinned = Arc::new(PermitConfig::from_settings(&settings.access));
            let rules = loader::load_policy(&path, &GuardRegistry::new(), Some(pinned))?;
            let (deny, allow) = rules.rule_count();
            println!("{deny} deny rule(s), {allow} allow rule(s)");
            for action in rules.actions() {
                println!(
                    "  {action}: {} deny, {} allow",
                    rules.deny_rules(&action).len(),
                    rules.allow_rules(&action).len()
                );
            }
        }
        Command::Decide(args) => decide(&settings, args).await?,
    }

    Ok(())
}

async fn authority(settings: &Settings) -> Result<Authority> {
    let db = storage::init(&settings.database).await?;
    Ok(Authority::from_store(Arc::new(SeaOrmStore::new(db))))
}

async fn role_command(settings: &Settings, cmd: RoleCommand) -> Result<()> {
    let authority = authority(settings).await?;
    match cmd {
        RoleCommand::Create {
            key,
            name,
            description,
            optional_resource,
            no_resource,
        } => {
            let mut role = NewRole::new(&key, name);
            if let Some(description) = description {
                role = role.with_description(description);
            }
            if optional_resource {
                role = role.optional_resource();
            } else if no_resource {
                role = role.without_resource();
            }
            let role = authority.create_role(role).await?;
            println!("Created role `{}` (id {})", role.key, role.id);
        }
        RoleCommand::List => {
            for role in authority.list_roles().await? {
                let resource = match (role.requires_resource, role.authorize_resource) {
                    (true, _) => "required",
                    (false, true) => "optional",
                    (false, false) => "none",
                };
                println!("{}\t{}\tresource: {resource}", role.key, role.name);
            }
        }
    }
    Ok(())
}

async fn decide(settings: &Settings, args: DecideArgs) -> Result<()> {
    let path = policy_path(settings, args.policy.policy)?;
    let authority = authority(settings).await?;
    let pinned =
        Arc::new(PermitConfig::from_settings(&settings.access).with_authority(authority));
    config::publish(PermitConfig::clone(&pinned));

    let rules = loader::load_policy(&path, &GuardRegistry::new(), Some(pinned))?;

    let subject = match args.subject {
        Some(id) if !args.guest => Subject::person(id),
        _ => Subject::guest(),
    };
    let mut ctx = Context::new();
    for var in &args.vars {
        let (name, value) = var
            .split_once('=')
            .ok_or_else(|| miette!("context variable `{var}` must look like name=Type/id"))?;
        if value.is_empty() {
            ctx = ctx.with_nil(name);
        } else {
            let key = parse_resource(value)?;
            ctx = ctx.with(name, ResourceRecord::new(key.resource_type, key.resource_id));
        }
    }

    let allowed = rules.permitted(&subject, &args.action, &ctx).await?;
    println!("{}", if allowed { "allow" } else { "deny" });
    Ok(())
}

fn policy_path(settings: &Settings, given: Option<PathBuf>) -> Result<PathBuf> {
    given
        .or_else(|| settings.policy.path.clone())
        .ok_or_else(|| miette!("no policy given and `policy.path` is not configured"))
}

fn parse_resource(s: &str) -> Result<ResourceKey> {
    ResourceKey::parse(s).ok_or_else(|| miette!("resource `{s}` must look like Type/id"))
}
