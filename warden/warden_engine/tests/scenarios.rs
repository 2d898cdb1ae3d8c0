use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use warden_agent::ipc::{InvokeCall, MechanismHandler};
use warden_agent::LocalConnector;
use warden_core::traits::{
    RecordingAuditSink, SessionInfo, StaticAccount, StaticDirectory, StaticHost, StaticProcess,
    StaticSession,
};
use chrono::{Duration as Age, Utc};
use warden_core::types::{
    AuthStatus, AuthorizationFlags, Credential, ItemFlags, ItemStore, MechanismResult, RightsList,
};
use warden_core::EngineConfig;
use warden_engine::{AuthToken, Engine, EngineServices, Session};
use warden_policy::{InMemoryRuleStore, Mechanism, Rule, RuleClass, RuleFlags, RuleSource};
use zeroize::Zeroizing;

const TIMEOUT: Duration = Duration::from_secs(5);

fn interactive() -> AuthorizationFlags {
    AuthorizationFlags::EXTEND_RIGHTS | AuthorizationFlags::INTERACTION_ALLOWED
}

fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_account(StaticAccount {
            uid: 501,
            name: "alice".into(),
            real_name: "Alice".into(),
            groups: vec!["admin".into(), "staff".into()],
            password: Some(Zeroizing::new("secret".into())),
            ..StaticAccount::default()
        })
        .with_account(StaticAccount {
            uid: 502,
            name: "bob".into(),
            real_name: "Bob".into(),
            groups: vec!["staff".into()],
            ..StaticAccount::default()
        })
}

fn caller() -> StaticProcess {
    StaticProcess {
        pid: 4242,
        uid: 501,
        path: "/usr/bin/tool".into(),
        platform_signed: true,
        ..StaticProcess::default()
    }
}

struct Harness {
    connector: LocalConnector,
    rules: Arc<InMemoryRuleStore>,
    audit: Arc<RecordingAuditSink>,
    session_info: Arc<StaticSession>,
    token: Arc<AuthToken>,
    host: StaticHost,
}

impl Harness {
    fn new() -> Self {
        Self::with_process(caller(), false)
    }

    fn with_process(process: StaticProcess, least_privileged: bool) -> Self {
        let session_info = Arc::new(StaticSession::new(501));
        let info: Arc<dyn SessionInfo> = session_info.clone();
        let session = Arc::new(Session::new(info));
        let token = AuthToken::new(Arc::new(process), session).with_least_privilege(least_privileged);
        Self {
            connector: LocalConnector::new(),
            rules: Arc::new(InMemoryRuleStore::new()),
            audit: Arc::new(RecordingAuditSink::new()),
            session_info,
            token: Arc::new(token),
            host: StaticHost::default(),
        }
    }

    fn rule(&self, rule: Rule) {
        self.rules.put_rule(rule).unwrap();
    }

    fn engine(&self) -> Engine {
        self.engine_with_config(EngineConfig::default())
    }

    fn engine_with_config(&self, config: EngineConfig) -> Engine {
        let directory = Arc::new(directory());
        let services = EngineServices::new(
            self.rules.clone(),
            directory.clone(),
            directory,
            Arc::new(self.connector.clone()),
        )
        .with_host(Arc::new(self.host))
        .with_audit(self.audit.clone())
        .with_config(config);
        Engine::new(Arc::clone(&self.token), services).unwrap()
    }
}

fn rights(names: &[&str]) -> RightsList {
    let mut rights = RightsList::new();
    for name in names {
        rights.add(*name);
    }
    rights
}

fn mech(name: &str) -> Mechanism {
    let (plugin, param) = name.split_once(':').unwrap();
    Mechanism::new(plugin, param, false)
}

/// Register a mechanism that denies `denials` times, then authenticates
/// as `uid`.
fn register_login(connector: &LocalConnector, name: &str, uid: u32, denials: usize) {
    let calls = AtomicUsize::new(0);
    connector.register_fn(name, move |call| {
        if calls.fetch_add(1, Ordering::SeqCst) < denials {
            return MechanismResult::Deny;
        }
        call.context.set_uint("uid", uid);
        call.context.set_flags("uid", ItemFlags::VOLATILE);
        MechanismResult::Allow
    });
}

#[test]
fn test_session_owner_allowed_without_agents() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.owner", RuleClass::User)
            .with_flags(RuleFlags::SESSION_OWNER)
            .with_mechanisms(vec![mech("test:login")]),
    );
    register_login(&harness.connector, "test:login", 501, 0);

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.owner"]), None, AuthorizationFlags::empty());

    assert_eq!(status, AuthStatus::Allow);
    assert!(engine.granted_rights().exists("system.test.owner"));
    assert_eq!(harness.connector.total_invocations(), 0);

    let records = harness.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rule, "system.test.owner");
    assert_eq!(records[0].status, AuthStatus::Allow);
    assert_eq!(records[0].client_pid, 4242);
}

#[test]
fn test_session_owner_rule_rejects_other_owner() {
    let harness = Harness::new();
    harness.rule(Rule::new("system.test.staff", RuleClass::User).with_group("wheel"));

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.staff"]), None, interactive());
    assert_eq!(status, AuthStatus::Deny);
    assert!(engine.granted_rights().is_empty());
}

#[test]
fn test_mechanism_rule_retries_until_allow() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.mech", RuleClass::Mechanism)
            .with_mechanisms(vec![mech("test:login")])
            .with_tries(3),
    );
    register_login(&harness.connector, "test:login", 501, 2);

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.mech"]), None, interactive());

    assert_eq!(status, AuthStatus::Allow);
    assert!(engine.granted_rights().exists("system.test.mech"));
    assert_eq!(harness.connector.invocations("test:login"), 3);
    // One agent served every pass.
    assert_eq!(harness.connector.connections(), 1);
    assert!(engine.credentials().iter().any(|c| c.uid() == 501));
    assert_eq!(engine.context().get_uint("uid"), 501);
}

#[test]
fn test_mechanism_rule_gives_up_after_tries() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.mech", RuleClass::Mechanism)
            .with_mechanisms(vec![mech("test:login")])
            .with_tries(2),
    );
    register_login(&harness.connector, "test:login", 501, usize::MAX);

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.mech"]), None, interactive());

    assert_eq!(status, AuthStatus::Deny);
    assert_eq!(harness.connector.invocations("test:login"), 2);
    assert!(engine.credentials().is_empty());
}

#[test]
fn test_user_rule_without_extend_rights_denies() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.admin", RuleClass::User)
            .with_group("admin")
            .with_flags(RuleFlags::AUTHENTICATE_USER)
            .with_mechanisms(vec![mech("test:login")]),
    );
    register_login(&harness.connector, "test:login", 501, 0);

    let mut engine = harness.engine();
    let status = engine.authorize(
        &rights(&["system.test.admin"]),
        None,
        AuthorizationFlags::INTERACTION_ALLOWED,
    );

    assert_eq!(status, AuthStatus::Deny);
    assert_eq!(harness.connector.total_invocations(), 0);
}

#[test]
fn test_user_rule_needs_interaction() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.admin", RuleClass::User)
            .with_group("admin")
            .with_flags(RuleFlags::AUTHENTICATE_USER)
            .with_mechanisms(vec![mech("test:login")]),
    );
    register_login(&harness.connector, "test:login", 501, 0);

    let mut engine = harness.engine();
    let status = engine.authorize(
        &rights(&["system.test.admin"]),
        None,
        AuthorizationFlags::EXTEND_RIGHTS,
    );
    assert_eq!(status, AuthStatus::InteractionNotAllowed);
    assert_eq!(harness.connector.total_invocations(), 0);
}

#[test]
fn test_user_rule_authenticates_and_shares_credential() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.admin", RuleClass::User)
            .with_group("admin")
            .with_timeout(300)
            .with_flags(RuleFlags::AUTHENTICATE_USER | RuleFlags::SHARED)
            .with_mechanisms(vec![mech("test:login")]),
    );
    register_login(&harness.connector, "test:login", 501, 0);

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.admin"]), None, interactive());
    assert_eq!(status, AuthStatus::Allow);
    assert_eq!(harness.connector.invocations("test:login"), 1);
    assert!(harness.session_info.is_authenticated());

    let session_credentials = harness.token.session().credentials();
    assert!(!session_credentials.is_empty());
    assert!(session_credentials.iter().all(|c| c.is_shared()));
    assert!(harness.token.credentials().iter().any(|c| c.uid() == 501));

    // A second engine on the same token reuses the credential.
    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.admin"]), None, interactive());
    assert_eq!(status, AuthStatus::Allow);
    assert_eq!(harness.connector.invocations("test:login"), 1);
}

#[test]
fn test_user_rule_reports_retry_reasons() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.admin", RuleClass::User)
            .with_group("admin")
            .with_tries(2)
            .with_flags(RuleFlags::AUTHENTICATE_USER)
            .with_mechanisms(vec![mech("test:login")]),
    );
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&reasons);
    harness.connector.register_fn("test:login", move |call| {
        seen.lock()
            .push(call.hints.get_string("reason").unwrap_or("").to_string());
        assert_eq!(call.hints.get_string("require-user-in-group"), Some("admin"));
        assert_eq!(call.hints.get_string("authorize-right"), Some("system.test.admin"));
        // Bob is not an administrator.
        call.context.set_uint("uid", 502);
        call.context.set_flags("uid", ItemFlags::VOLATILE);
        MechanismResult::Allow
    });

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.admin"]), None, interactive());

    assert_eq!(status, AuthStatus::Deny);
    assert_eq!(
        reasons.lock().as_slice(),
        &["none", "user-not-in-group", "too-many-tries"]
    );
    assert!(!engine.hints().exists("authorize-right"));
    assert!(!harness.session_info.is_authenticated());
}

fn admin_rule() -> Rule {
    Rule::new("system.test.admin", RuleClass::User)
        .with_group("admin")
        .with_timeout(300)
        .with_tries(1)
        .with_flags(RuleFlags::AUTHENTICATE_USER)
        .with_mechanisms(vec![mech("test:login")])
}

#[test]
fn test_mistyped_uid_never_becomes_root() {
    let harness = Harness::new();
    harness.rule(admin_rule());
    // Bob reported as a signed integer is still bob.
    harness.connector.register_fn("test:login", |call| {
        call.context.set_int("uid", 502);
        call.context.set_flags("uid", ItemFlags::VOLATILE);
        MechanismResult::Allow
    });

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.admin"]), None, interactive());
    assert_eq!(status, AuthStatus::Deny);
    assert!(engine.credentials().iter().all(|c| c.uid() != 0));
    assert!(harness.token.credentials().iter().all(|c| c.uid() != 0));

    let harness = Harness::new();
    harness.rule(admin_rule());
    harness.connector.register_fn("test:login", |call| {
        call.context.set_data("uid", &[0xff, 0xff]);
        call.context.set_flags("uid", ItemFlags::VOLATILE);
        MechanismResult::Allow
    });

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.admin"]), None, interactive());
    assert_eq!(status, AuthStatus::Deny);
    assert!(engine.credentials().is_empty());
    assert!(harness.token.credentials().is_empty());
}

#[test]
fn test_signed_uid_authenticates() {
    let harness = Harness::new();
    harness.rule(admin_rule());
    harness.connector.register_fn("test:login", |call| {
        call.context.set_int64("uid", 501);
        call.context.set_flags("uid", ItemFlags::VOLATILE);
        MechanismResult::Allow
    });

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.admin"]), None, interactive());
    assert_eq!(status, AuthStatus::Allow);
    assert!(harness.token.credentials().iter().any(|c| c.uid() == 501));
}

#[test]
fn test_mechanism_rule_ignores_malformed_uid() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.mech", RuleClass::Mechanism)
            .with_mechanisms(vec![mech("test:login")])
            .with_tries(1),
    );
    harness.connector.register_fn("test:login", |call| {
        call.context.set_int("uid", -7);
        call.context.set_flags("uid", ItemFlags::VOLATILE);
        MechanismResult::Allow
    });

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.mech"]), None, interactive());
    assert_eq!(status, AuthStatus::Allow);
    assert!(engine.credentials().is_empty());
}

#[test]
fn test_expired_credential_requires_authentication() {
    let harness = Harness::new();
    harness.rule(admin_rule());
    register_login(&harness.connector, "test:login", 501, 0);
    let stale = Credential::create(501, false, &directory())
        .with_creation_time(Utc::now() - Age::seconds(600));
    harness.token.set_credential(&stale);

    let mut engine = harness.engine();
    let status = engine.authorize(
        &rights(&["system.test.admin"]),
        None,
        AuthorizationFlags::EXTEND_RIGHTS,
    );
    assert_eq!(status, AuthStatus::InteractionNotAllowed);

    let status = engine.authorize(&rights(&["system.test.admin"]), None, interactive());
    assert_eq!(status, AuthStatus::Allow);
    assert_eq!(harness.connector.invocations("test:login"), 1);
}

#[test]
fn test_fresh_credential_is_accepted() {
    let harness = Harness::new();
    harness.rule(admin_rule());
    register_login(&harness.connector, "test:login", 501, 0);
    let fresh = Credential::create(501, false, &directory())
        .with_creation_time(Utc::now() - Age::seconds(60));
    harness.token.set_credential(&fresh);

    let mut engine = harness.engine();
    let status = engine.authorize(
        &rights(&["system.test.admin"]),
        None,
        AuthorizationFlags::empty(),
    );
    assert_eq!(status, AuthStatus::Allow);
    assert_eq!(harness.connector.total_invocations(), 0);
}

#[test]
fn test_user_rule_falls_back_to_authenticate_rule() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.admin", RuleClass::User)
            .with_group("admin")
            .with_flags(RuleFlags::AUTHENTICATE_USER),
    );
    harness.rule(
        Rule::new("authenticate", RuleClass::Mechanism).with_mechanisms(vec![mech("test:login")]),
    );
    register_login(&harness.connector, "test:login", 501, 0);

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.admin"]), None, interactive());
    assert_eq!(status, AuthStatus::Allow);
    assert_eq!(harness.connector.invocations("test:login"), 1);
}

#[test]
fn test_low_power_blocks_interactive_user_rule() {
    let mut harness = Harness::new();
    harness.host = StaticHost {
        low_power: true,
        ..StaticHost::default()
    };
    harness.rule(
        Rule::new("system.test.admin", RuleClass::User)
            .with_group("admin")
            .with_flags(RuleFlags::AUTHENTICATE_USER)
            .with_mechanisms(vec![mech("test:login")]),
    );
    register_login(&harness.connector, "test:login", 501, 0);

    let mut engine = harness.engine();
    assert_eq!(
        engine.authorize(&rights(&["system.test.admin"]), None, interactive()),
        AuthStatus::Deny
    );
    assert_eq!(
        engine.authorize(
            &rights(&["system.test.admin"]),
            None,
            interactive() | AuthorizationFlags::IGNORE_LOW_POWER
        ),
        AuthStatus::Allow
    );
}

#[test]
fn test_pre_authorize_marks_granted_right() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.later", RuleClass::User)
            .with_group("admin")
            .with_timeout(0)
            .with_flags(RuleFlags::AUTHENTICATE_USER)
            .with_mechanisms(vec![mech("test:login")]),
    );

    let mut engine = harness.engine();
    let status = engine.authorize(
        &rights(&["system.test.later"]),
        None,
        AuthorizationFlags::EXTEND_RIGHTS | AuthorizationFlags::PRE_AUTHORIZE,
    );
    assert_eq!(status, AuthStatus::Allow);
    assert!(engine
        .granted_rights()
        .get_flags("system.test.later")
        .contains(AuthorizationFlags::PRE_AUTHORIZE));
    assert_eq!(harness.connector.total_invocations(), 0);
}

#[test]
fn test_environment_credentials() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.admin", RuleClass::User)
            .with_group("admin")
            .with_flags(RuleFlags::AUTHENTICATE_USER)
            .with_mechanisms(vec![mech("test:login")]),
    );
    register_login(&harness.connector, "test:login", 501, 0);

    let mut environment = ItemStore::new();
    environment.set_string("username", "alice");
    environment.set_data("password", b"secret");

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.admin"]), Some(&environment), interactive());
    assert_eq!(status, AuthStatus::Allow);
    assert_eq!(harness.connector.total_invocations(), 0);
    assert_eq!(engine.context().get_string("username"), Some("alice"));
    assert!(engine.context().check_flags("password", ItemFlags::SENSITIVE));

    // A fresh token, so nothing written back above can satisfy the rule.
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.admin", RuleClass::User)
            .with_group("admin")
            .with_flags(RuleFlags::AUTHENTICATE_USER),
    );
    environment.set_data("password", b"wrong");
    let mut engine = harness.engine();
    let status = engine.authorize(
        &rights(&["system.test.admin"]),
        Some(&environment),
        AuthorizationFlags::EXTEND_RIGHTS,
    );
    assert_eq!(status, AuthStatus::InteractionNotAllowed);
}

fn delegation_harness(kofn: u32, results: [MechanismResult; 3]) -> Harness {
    let harness = Harness::new();
    let mut names = Vec::new();
    for (i, result) in results.into_iter().enumerate() {
        let rule = format!("step{}", i + 1);
        let mechanism = format!("test:step{}", i + 1);
        harness.connector.register_fn(&mechanism, move |_| result);
        harness.rule(
            Rule::new(rule.as_str(), RuleClass::Mechanism)
                .with_mechanisms(vec![mech(&mechanism)])
                .with_tries(1),
        );
        names.push(rule);
    }
    harness.rule(
        Rule::new("system.test.kofn", RuleClass::Rule)
            .with_delegates(names)
            .with_kofn(kofn),
    );
    harness
}

#[test]
fn test_kofn_stops_at_threshold() {
    use MechanismResult::*;
    let harness = delegation_harness(2, [Allow, Allow, Allow]);
    let mut engine = harness.engine();

    let status = engine.authorize(&rights(&["system.test.kofn"]), None, interactive());
    assert_eq!(status, AuthStatus::Allow);
    assert_eq!(harness.connector.invocations("test:step1"), 1);
    assert_eq!(harness.connector.invocations("test:step2"), 1);
    assert_eq!(harness.connector.invocations("test:step3"), 0);
}

#[test]
fn test_kofn_fails_once_unreachable() {
    use MechanismResult::*;
    let harness = delegation_harness(2, [Deny, Deny, Allow]);
    let mut engine = harness.engine();

    let status = engine.authorize(&rights(&["system.test.kofn"]), None, interactive());
    assert_eq!(status, AuthStatus::Deny);
    assert_eq!(harness.connector.invocations("test:step2"), 1);
    assert_eq!(harness.connector.invocations("test:step3"), 0);
}

#[test]
fn test_all_delegates_required() {
    use MechanismResult::*;
    let harness = delegation_harness(0, [Allow, Deny, Allow]);
    let mut engine = harness.engine();

    let status = engine.authorize(&rights(&["system.test.kofn"]), None, interactive());
    assert_eq!(status, AuthStatus::Deny);
    assert_eq!(harness.connector.invocations("test:step3"), 0);

    let harness = delegation_harness(0, [Allow, Allow, Allow]);
    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.kofn"]), None, interactive());
    assert_eq!(status, AuthStatus::Allow);
}

#[test]
fn test_cancel_aborts_delegation() {
    use MechanismResult::*;
    let harness = delegation_harness(1, [UserCanceled, Allow, Allow]);
    let mut engine = harness.engine();

    let status = engine.authorize(&rights(&["system.test.kofn"]), None, interactive());
    assert_eq!(status, AuthStatus::Canceled);
    assert_eq!(harness.connector.invocations("test:step2"), 0);
}

#[test]
fn test_delegation_errors_are_internal() {
    let harness = Harness::new();
    harness.rule(Rule::new("system.test.missing", RuleClass::Rule).with_delegates(["nowhere"]));
    harness.rule(Rule::new("system.test.loop", RuleClass::Rule).with_delegates(["system.test.loop"]));

    let mut engine = harness.engine();
    assert_eq!(
        engine.authorize(&rights(&["system.test.missing"]), None, interactive()),
        AuthStatus::Internal
    );
    assert_eq!(
        engine.authorize(&rights(&["system.test.loop"]), None, interactive()),
        AuthStatus::Internal
    );
}

#[test]
fn test_self_delegation_hits_depth_limit() {
    let harness = Harness::new();
    harness.rule(Rule::new("a", RuleClass::Rule).with_delegates(["a"]));

    let mut engine = harness.engine();
    assert_eq!(engine.authorize(&rights(&["a"]), None, interactive()), AuthStatus::Internal);

    let records = harness.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].right, "a");
    assert_eq!(records[0].rule, "a");
    assert_eq!(records[0].status, AuthStatus::Internal);
}

#[test]
fn test_delegation_depth_is_configurable() {
    let harness = Harness::new();
    harness.rule(Rule::new("system.test.d0", RuleClass::Rule).with_delegates(["system.test.d1"]));
    harness.rule(Rule::new("system.test.d1", RuleClass::Rule).with_delegates(["system.test.d2"]));
    harness.rule(Rule::new("system.test.d2", RuleClass::Allow));
    let requested = rights(&["system.test.d0"]);

    let mut config = EngineConfig::default();
    config.engine.max_rule_depth = 2;
    let mut engine = harness.engine_with_config(config.clone());
    assert_eq!(engine.authorize(&requested, None, interactive()), AuthStatus::Allow);

    config.engine.max_rule_depth = 1;
    let mut engine = harness.engine_with_config(config);
    assert_eq!(engine.authorize(&requested, None, interactive()), AuthStatus::Internal);
}

#[test]
fn test_partial_rights() {
    let harness = Harness::new();
    harness.rule(Rule::new("system.test.yes", RuleClass::Allow));
    harness.rule(Rule::new("system.test.no", RuleClass::Deny));
    let requested = rights(&["system.test.no", "system.test.yes"]);

    let mut engine = harness.engine();
    assert_eq!(engine.authorize(&requested, None, interactive()), AuthStatus::Deny);
    assert!(engine.granted_rights().is_empty());

    let status = engine.authorize(
        &requested,
        None,
        interactive() | AuthorizationFlags::PARTIAL_RIGHTS,
    );
    assert_eq!(status, AuthStatus::Allow);
    assert_eq!(engine.granted_rights().names().collect::<Vec<_>>(), vec!["system.test.yes"]);
}

#[test]
fn test_partial_rights_survive_cancel() {
    let harness = Harness::new();
    harness.rule(Rule::new("system.test.yes", RuleClass::Allow));
    harness.rule(
        Rule::new("system.test.cancel", RuleClass::Mechanism)
            .with_mechanisms(vec![mech("test:cancel")])
            .with_tries(1),
    );
    harness
        .connector
        .register_fn("test:cancel", |_| MechanismResult::UserCanceled);
    let requested = rights(&["system.test.yes", "system.test.cancel"]);

    let mut engine = harness.engine();
    assert_eq!(engine.authorize(&requested, None, interactive()), AuthStatus::Canceled);

    let status = engine.authorize(
        &requested,
        None,
        interactive() | AuthorizationFlags::PARTIAL_RIGHTS,
    );
    assert_eq!(status, AuthStatus::Allow);
    assert_eq!(engine.granted_rights().names().collect::<Vec<_>>(), vec!["system.test.yes"]);

    // A dismissed engine reports the cancellation even with grants.
    engine.dismiss();
    let status = engine.authorize(
        &rights(&["system.test.yes"]),
        None,
        interactive() | AuthorizationFlags::PARTIAL_RIGHTS,
    );
    assert_eq!(status, AuthStatus::Canceled);
}

#[test]
fn test_sandbox_denies_before_lookup() {
    let mut process = caller();
    process.sandbox_denied_rights = vec!["system.test.yes".into()];
    let harness = Harness::with_process(process, false);
    harness.rule(Rule::new("system.test.yes", RuleClass::Allow));

    let mut engine = harness.engine();
    let status = engine.authorize(&rights(&["system.test.yes"]), None, interactive());
    assert_eq!(status, AuthStatus::Deny);
    assert_eq!(harness.audit.records()[0].status, AuthStatus::Deny);
}

#[test]
fn test_entitlements() {
    let mut process = caller();
    process.entitled_rights = vec!["system.test.entitled".into(), "system.test.builtin".into()];
    let harness = Harness::with_process(process, false);
    harness.rule(
        Rule::new("system.test.entitled", RuleClass::User)
            .with_flags(RuleFlags::ENTITLED | RuleFlags::AUTHENTICATE_USER),
    );
    harness.rule(
        Rule::new("system.test.builtin", RuleClass::Mechanism)
            .with_mechanisms(vec![Mechanism::new("builtin", "entitled", false)])
            .with_tries(1),
    );
    harness.rule(
        Rule::new("system.test.other", RuleClass::Mechanism)
            .with_mechanisms(vec![Mechanism::new("builtin", "entitled", false)])
            .with_tries(1),
    );

    let mut engine = harness.engine();
    assert_eq!(
        engine.authorize(&rights(&["system.test.entitled"]), None, AuthorizationFlags::empty()),
        AuthStatus::Allow
    );
    assert_eq!(
        engine.authorize(&rights(&["system.test.builtin"]), None, interactive()),
        AuthStatus::Allow
    );
    assert_eq!(
        engine.authorize(&rights(&["system.test.other"]), None, interactive()),
        AuthStatus::Deny
    );
    assert_eq!(harness.connector.connections(), 0);
}

#[test]
fn test_least_privilege_records_right_credentials() {
    let harness = Harness::with_process(caller(), true);
    harness.rule(
        Rule::new("system.test.admin", RuleClass::User)
            .with_group("admin")
            .with_timeout(300)
            .with_flags(RuleFlags::AUTHENTICATE_USER)
            .with_mechanisms(vec![mech("test:login")]),
    );
    harness.rule(
        Rule::new("system.test.other", RuleClass::User)
            .with_group("admin")
            .with_timeout(300)
            .with_flags(RuleFlags::AUTHENTICATE_USER)
            .with_mechanisms(vec![mech("test:login")]),
    );
    register_login(&harness.connector, "test:login", 501, 0);

    let mut engine = harness.engine();
    assert_eq!(
        engine.authorize(&rights(&["system.test.admin"]), None, interactive()),
        AuthStatus::Allow
    );
    let held = harness.token.credentials();
    assert!(!held.is_empty());
    assert!(held.iter().all(|c| c.is_right()));
    assert!(held.iter().any(|c| c.name() == Some("system.test.admin")));

    let mut engine = harness.engine();
    assert_eq!(
        engine.authorize(&rights(&["system.test.admin"]), None, interactive()),
        AuthStatus::Allow
    );
    assert_eq!(harness.connector.invocations("test:login"), 1);

    // The right credential does not cover a different right.
    assert_eq!(
        engine.authorize(&rights(&["system.test.other"]), None, interactive()),
        AuthStatus::Allow
    );
    assert_eq!(harness.connector.invocations("test:login"), 2);
}

#[test]
fn test_verify_modify() {
    let harness = Harness::new();
    harness.rule(Rule::new("config.add.", RuleClass::Allow));
    harness.rule(Rule::new("config.modify.", RuleClass::Deny));
    harness.rule(Rule::new("config.remove.", RuleClass::Allow));
    harness.rule(Rule::new("system.existing", RuleClass::Allow));

    let mut engine = harness.engine();
    assert_eq!(engine.verify_modify("system.new", false), AuthStatus::Allow);
    assert_eq!(engine.verify_modify("system.existing", false), AuthStatus::Deny);
    assert_eq!(engine.verify_modify("system.existing", true), AuthStatus::Allow);
    assert_eq!(engine.verify_modify("system.missing", true), AuthStatus::Allow);
    assert_eq!(engine.verify_modify("system.", false), AuthStatus::Deny);
    assert_eq!(engine.verify_modify("config.add.anything", false), AuthStatus::Allow);

    let checked: Vec<String> = harness.audit.records().into_iter().map(|r| r.right).collect();
    assert_eq!(
        checked,
        vec![
            "config.add.system.new",
            "config.modify.system.existing",
            "config.remove.system.existing",
            "config.add.anything",
        ]
    );
}

struct Gate {
    calls: usize,
    entered: Sender<()>,
    release: Receiver<()>,
    reasons: Arc<Mutex<Vec<String>>>,
}

impl MechanismHandler for Gate {
    fn invoke(&mut self, call: &mut InvokeCall) -> MechanismResult {
        self.calls += 1;
        self.reasons
            .lock()
            .push(call.hints.get_string("reason").unwrap_or("").to_string());
        if self.calls == 1 {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
        MechanismResult::Allow
    }
}

struct GateControl {
    entered: Receiver<()>,
    release: Sender<()>,
    reasons: Arc<Mutex<Vec<String>>>,
}

fn register_gate(connector: &LocalConnector, name: &str) -> GateControl {
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&reasons);
    connector.register(name, move || {
        Box::new(Gate {
            calls: 0,
            entered: entered_tx.clone(),
            release: release_rx.clone(),
            reasons: Arc::clone(&recorded),
        }) as Box<dyn MechanismHandler>
    });
    GateControl {
        entered: entered_rx,
        release: release_tx,
        reasons,
    }
}

#[test]
fn test_dismiss_cancels_blocked_chain() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.mech", RuleClass::Mechanism)
            .with_mechanisms(vec![mech("test:gate")])
            .with_tries(0),
    );
    let gate = register_gate(&harness.connector, "test:gate");

    let mut engine = harness.engine();
    let handle = engine.handle();
    let runner = thread::spawn(move || {
        engine.authorize(&rights(&["system.test.mech"]), None, interactive())
    });

    gate.entered.recv_timeout(TIMEOUT).unwrap();
    handle.dismiss();
    assert!(handle.is_dismissed());
    assert_eq!(runner.join().unwrap(), AuthStatus::Canceled);

    gate.release.send(()).unwrap();
}

#[test]
fn test_interrupt_restarts_chain() {
    let harness = Harness::new();
    harness.rule(
        Rule::new("system.test.chain", RuleClass::Mechanism)
            .with_mechanisms(vec![mech("test:first"), mech("test:second")])
            .with_tries(1),
    );
    let first_reasons = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&first_reasons);
    harness.connector.register_fn("test:first", move |call| {
        seen.lock()
            .push(call.hints.get_string("reason").unwrap_or("").to_string());
        MechanismResult::Allow
    });
    let gate = register_gate(&harness.connector, "test:second");

    let mut engine = harness.engine();
    let runner = thread::spawn(move || {
        let status = engine.authorize(&rights(&["system.test.chain"]), None, interactive());
        (status, engine)
    });

    gate.entered.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(harness.connector.request_interrupt("test:first"), 1);
    gate.release.send(()).unwrap();

    let (status, engine) = runner.join().unwrap();
    assert_eq!(status, AuthStatus::Allow);
    assert_eq!(harness.connector.invocations("test:first"), 2);
    assert_eq!(harness.connector.invocations("test:second"), 2);
    assert_eq!(first_reasons.lock().last().map(String::as_str), Some("world-changed"));
    assert_eq!(gate.reasons.lock().len(), 2);
    drop(engine);
}
