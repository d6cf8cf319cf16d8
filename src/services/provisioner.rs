use tracing::{debug, error, info, warn};

use super::database::Database;
use super::db_loader::DbLoader;
use super::ddl::{self, Statement};
use super::inference::SchemaInferrer;
use super::mock::RecordingDatabase;
use super::profiler::ColumnProfiler;
use crate::config::PostgresConfig;
use crate::error::AppError;
use crate::models::{
    MembershipCheck, PrivilegeCheck, ProvisionPlan, ProvisionReport, RoleCredentials,
    TablePrivilege, TableSchema,
};

/// Runs a [`ProvisionPlan`] against a PostgreSQL server.
///
/// Work is split in two phases because `CREATE DATABASE` has to run on a
/// connection to some other database (normally `postgres`), while everything
/// else runs on a connection to the new database.
pub struct Provisioner {
    plan: ProvisionPlan,
    profiler: ColumnProfiler,
}

impl Provisioner {
    pub fn new(plan: ProvisionPlan) -> Self {
        let profiler = ColumnProfiler::new().with_delimiter(plan.delimiter);
        Self { plan, profiler }
    }

    pub fn plan(&self) -> &ProvisionPlan {
        &self.plan
    }

    /// Connects to the maintenance database, then to the target database, and
    /// runs both phases.
    pub async fn run(&self, postgres: &PostgresConfig) -> Result<ProvisionReport, AppError> {
        let start = std::time::Instant::now();

        let admin = DbLoader::connect(postgres, &postgres.maintenance_db).await?;
        let created = self.create_database(&admin).await?;
        drop(admin);

        let db = DbLoader::connect(postgres, &self.plan.database).await?;
        let report = self.provision(&db, created).await?;

        info!("Provisioning finished in {:?}", start.elapsed());
        Ok(report)
    }

    /// Runs both phases against [`RecordingDatabase`]s and returns every
    /// statement that would be sent, assuming nothing exists yet.
    pub async fn dry_run(&self) -> Result<Vec<Statement>, AppError> {
        let admin = RecordingDatabase::new(self.plan.database.clone());
        self.create_database(&admin).await?;

        let db = RecordingDatabase::new(self.plan.database.clone());
        self.provision(&db, true).await?;

        let mut statements = admin.statements().await;
        statements.extend(db.statements().await);
        Ok(statements)
    }

    /// Creates the target database unless it already exists. Returns whether
    /// it was created.
    pub async fn create_database(&self, admin: &dyn Database) -> Result<bool, AppError> {
        let database = &self.plan.database;
        if admin.query_bool(&ddl::database_exists(database)).await? {
            info!("Database {} already exists", database);
            return Ok(false);
        }

        execute(admin, ddl::create_database(database)).await?;
        info!("Created database {}", database);
        Ok(true)
    }

    /// Scans the CSV file off the async runtime.
    pub async fn infer_schema(&self) -> Result<TableSchema, AppError> {
        let inferrer = SchemaInferrer::new(self.profiler, self.plan.enum_threshold);
        let path = self.plan.csv_path.clone();
        let schema = self.plan.schema.clone();
        let table = self.plan.table.clone();

        let inferred = tokio::task::spawn_blocking(move || inferrer.infer(&path, &schema, &table)).await?;
        Ok(inferred?)
    }

    pub async fn provision(
        &self,
        db: &dyn Database,
        database_created: bool,
    ) -> Result<ProvisionReport, AppError> {
        let plan = &self.plan;
        let table = self.infer_schema().await?;

        info!("Creating schema {} and table {}", plan.schema, plan.table);
        execute(db, ddl::create_schema(&plan.schema)).await?;
        for statement in ddl::table_statements(&table) {
            execute(db, statement).await?;
        }

        let copy = ddl::copy_from_stdin(&table, self.profiler.delimiter(), self.profiler.quote());
        debug!("Executing: {}", copy);
        let rows_loaded = db.copy_in(&copy, &plan.csv_path).await?;
        info!("Loaded {} rows into {}.{}", rows_loaded, plan.schema, plan.table);

        self.create_roles(db).await?;
        self.grant_privileges(db).await?;

        self.verify(db, table, database_created, rows_loaded).await
    }

    async fn create_roles(&self, db: &dyn Database) -> Result<(), AppError> {
        let access = &self.plan.access;

        for group in [&access.readonly_group, &access.readwrite_group] {
            if db.query_bool(&ddl::role_exists(group)).await? {
                debug!("Group {} already exists", group);
            } else {
                execute(db, ddl::create_group(group)).await?;
                info!("Created group {}", group);
            }
        }

        for (user, group) in self.assignments() {
            if db.query_bool(&ddl::role_exists(&user.name)).await? {
                execute(db, ddl::alter_user_password(user)).await?;
                info!("Updated existing user {}", user.name);
            } else {
                execute(db, ddl::create_user(user)).await?;
                info!("Created user {}", user.name);
            }
            execute(db, ddl::grant_membership(group, &user.name)).await?;
        }

        Ok(())
    }

    async fn grant_privileges(&self, db: &dyn Database) -> Result<(), AppError> {
        let plan = &self.plan;
        let access = &plan.access;

        let mut statements = ddl::revoke_public(&plan.database, &plan.schema);
        statements.extend(ddl::grant_group(
            &plan.database,
            &plan.schema,
            &access.readonly_group,
            &[TablePrivilege::Select],
        ));
        statements.extend(ddl::grant_group(
            &plan.database,
            &plan.schema,
            &access.readwrite_group,
            &TablePrivilege::ALL,
        ));

        for statement in statements {
            execute(db, statement).await?;
        }
        info!(
            "Granted read access to {} and read-write access to {}",
            access.readonly_group, access.readwrite_group
        );
        Ok(())
    }

    async fn verify(
        &self,
        db: &dyn Database,
        table: TableSchema,
        database_created: bool,
        rows_loaded: u64,
    ) -> Result<ProvisionReport, AppError> {
        let plan = &self.plan;

        let rows_counted = db.query_count(&ddl::count_rows(&plan.schema, &plan.table)).await?;
        let records_scanned = table.records as u64;
        let rows_match = u64::try_from(rows_counted).map_or(false, |n| n == rows_loaded);
        if !rows_match {
            warn!("COPY reported {} rows but the table holds {}", rows_loaded, rows_counted);
        }
        let records_match = records_scanned == rows_loaded;
        if !records_match {
            warn!("Scanned {} records but COPY loaded {}", records_scanned, rows_loaded);
        }

        let mut privileges = Vec::new();
        for (user, _) in self.assignments() {
            let allowed = self.allowed_privileges(user);
            for privilege in TablePrivilege::ALL {
                let statement = ddl::has_table_privilege(&user.name, &plan.schema, &plan.table, privilege);
                let granted = db.query_bool(&statement).await?;
                privileges.push(PrivilegeCheck {
                    role: user.name.clone(),
                    privilege,
                    expected: allowed.contains(&privilege),
                    granted,
                });
            }
        }

        let mut memberships = Vec::new();
        for (user, group) in self.assignments() {
            let member = db.query_bool(&ddl::is_member(&user.name, group)).await?;
            memberships.push(MembershipCheck {
                user: user.name.clone(),
                group: group.clone(),
                member,
            });
        }

        let mut report = ProvisionReport {
            database: plan.database.clone(),
            schema: plan.schema.clone(),
            table: plan.table.clone(),
            database_created,
            columns: table.columns,
            records_scanned,
            rows_loaded,
            rows_counted,
            privileges,
            memberships,
            verified: false,
        };

        let mismatches = report.mismatches();
        for check in &mismatches {
            warn!(
                "{} on {}.{} for {}: expected {}, granted {}",
                check.privilege.as_sql(),
                plan.schema,
                plan.table,
                check.role,
                check.expected,
                check.granted
            );
        }
        for check in report.memberships.iter().filter(|m| !m.member) {
            warn!("{} is not a member of {}", check.user, check.group);
        }

        let verified = rows_match
            && records_match
            && mismatches.is_empty()
            && report.memberships.iter().all(|m| m.member);
        report.verified = verified;

        if verified {
            info!("Verified privileges and row count for {}.{}", plan.schema, plan.table);
        }
        Ok(report)
    }

    fn assignments(&self) -> [(&RoleCredentials, &String); 2] {
        let access = &self.plan.access;
        [
            (&access.readonly_user, &access.readonly_group),
            (&access.readwrite_user, &access.readwrite_group),
        ]
    }

    fn allowed_privileges(&self, user: &RoleCredentials) -> &'static [TablePrivilege] {
        if user.name == self.plan.access.readwrite_user.name {
            &TablePrivilege::ALL
        } else {
            &[TablePrivilege::Select]
        }
    }
}

async fn execute(db: &dyn Database, statement: Statement) -> Result<(), AppError> {
    debug!("Executing on {}: {}", db.name(), statement);
    db.execute(&statement).await.map_err(|e| {
        error!("Failed: {}: {}", statement, e);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccessPlan;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn plan(csv: &NamedTempFile) -> ProvisionPlan {
        ProvisionPlan {
            database: "analytics".into(),
            schema: "staging".into(),
            table: "visits".into(),
            csv_path: csv.path().to_path_buf(),
            delimiter: b',',
            enum_threshold: 10,
            access: AccessPlan {
                readonly_group: "readonly".into(),
                readwrite_group: "readwrite".into(),
                readonly_user: RoleCredentials { name: "analyst".into(), password: "ro-pass".into() },
                readwrite_user: RoleCredentials { name: "editor".into(), password: "rw-pass".into() },
            },
        }
    }

    /// Answers every privilege check the way a correct grant would.
    fn granted_everything_expected(db: RecordingDatabase) -> RecordingDatabase {
        let mut db = db;
        for privilege in TablePrivilege::ALL {
            db = db
                .with_bool(&ddl::has_table_privilege("editor", "staging", "visits", privilege), true)
                .with_bool(
                    &ddl::has_table_privilege("analyst", "staging", "visits", privilege),
                    privilege == TablePrivilege::Select,
                );
        }
        db.with_bool(&ddl::is_member("analyst", "readonly"), true)
            .with_bool(&ddl::is_member("editor", "readwrite"), true)
    }

    const VISITS: &str = "id,weekday\n1,Monday\n2,Tuesday\n3,Monday\n";

    #[tokio::test]
    async fn creates_missing_database() {
        let csv = csv_file(VISITS);
        let provisioner = Provisioner::new(plan(&csv));
        let admin = RecordingDatabase::new("postgres");

        assert!(provisioner.create_database(&admin).await.unwrap());
        let sql: Vec<String> = admin.statements().await.into_iter().map(|s| s.sql).collect();
        assert_eq!(
            sql,
            vec![
                "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = 'analytics')",
                "CREATE DATABASE \"analytics\"",
            ]
        );
    }

    #[tokio::test]
    async fn existing_database_is_left_alone() {
        let csv = csv_file(VISITS);
        let provisioner = Provisioner::new(plan(&csv));
        let admin = RecordingDatabase::new("postgres")
            .with_bool(&ddl::database_exists("analytics"), true);

        assert!(!provisioner.create_database(&admin).await.unwrap());
        assert_eq!(admin.statements().await.len(), 1);
    }

    #[tokio::test]
    async fn provisions_table_roles_and_grants_in_order() {
        let csv = csv_file(VISITS);
        let provisioner = Provisioner::new(plan(&csv));
        let db = granted_everything_expected(RecordingDatabase::new("analytics"))
            .with_count(3)
            .with_copied_rows(3);

        let report = provisioner.provision(&db, true).await.unwrap();
        assert!(report.verified);
        assert_eq!(report.rows_loaded, 3);
        assert_eq!(report.privileges.len(), 8);

        let labels: Vec<String> = db.statements().await.into_iter().map(|s| s.label).collect();
        let position = |prefix: &str| {
            labels
                .iter()
                .position(|l| l.starts_with(prefix))
                .unwrap_or_else(|| panic!("missing statement starting with {prefix}"))
        };

        assert_eq!(labels[0], "CREATE SCHEMA IF NOT EXISTS \"staging\"");
        assert!(position("CREATE TYPE \"staging\".\"visits_weekday\"") < position("CREATE TABLE"));
        assert!(position("CREATE TABLE") < position("COPY"));
        assert!(position("COPY") < position("CREATE ROLE \"readonly\" NOLOGIN"));
        assert!(position("CREATE ROLE \"analyst\" LOGIN") < position("GRANT \"readonly\" TO \"analyst\""));
        assert!(position("REVOKE ALL ON SCHEMA") < position("GRANT SELECT ON ALL TABLES"));
        assert!(labels.iter().all(|l| !l.contains("ro-pass") && !l.contains("rw-pass")));

        assert_eq!(db.copies().await, vec![csv.path().to_path_buf()]);
    }

    #[tokio::test]
    async fn existing_users_get_their_password_reset() {
        let csv = csv_file(VISITS);
        let provisioner = Provisioner::new(plan(&csv));
        let db = granted_everything_expected(RecordingDatabase::new("analytics"))
            .with_bool(&ddl::role_exists("readonly"), true)
            .with_bool(&ddl::role_exists("analyst"), true)
            .with_count(3)
            .with_copied_rows(3);

        provisioner.provision(&db, false).await.unwrap();

        let sql: Vec<String> = db.statements().await.into_iter().map(|s| s.sql).collect();
        assert!(!sql.iter().any(|s| s == "CREATE ROLE \"readonly\" NOLOGIN"));
        assert!(sql.iter().any(|s| s == "CREATE ROLE \"readwrite\" NOLOGIN"));
        assert!(sql.iter().any(|s| s == "ALTER ROLE \"analyst\" WITH LOGIN PASSWORD 'ro-pass'"));
        assert!(sql.iter().any(|s| s == "CREATE ROLE \"editor\" LOGIN PASSWORD 'rw-pass'"));
    }

    #[tokio::test]
    async fn privilege_mismatches_are_reported() {
        let csv = csv_file(VISITS);
        let provisioner = Provisioner::new(plan(&csv));
        let db = granted_everything_expected(RecordingDatabase::new("analytics"))
            .with_bool(
                &ddl::has_table_privilege("analyst", "staging", "visits", TablePrivilege::Delete),
                true,
            )
            .with_count(3)
            .with_copied_rows(3);

        let report = provisioner.provision(&db, false).await.unwrap();
        assert!(!report.verified);

        let mismatches = report.mismatches();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].role, "analyst");
        assert_eq!(mismatches[0].privilege, TablePrivilege::Delete);
    }

    #[tokio::test]
    async fn row_count_disagreement_fails_verification() {
        let csv = csv_file(VISITS);
        let provisioner = Provisioner::new(plan(&csv));
        let db = granted_everything_expected(RecordingDatabase::new("analytics"))
            .with_count(2)
            .with_copied_rows(3);

        let report = provisioner.provision(&db, false).await.unwrap();
        assert!(!report.verified);
        assert!(report.mismatches().is_empty());
    }

    #[tokio::test]
    async fn copy_must_load_every_scanned_record() {
        let csv = csv_file(VISITS);
        let provisioner = Provisioner::new(plan(&csv));
        let db = granted_everything_expected(RecordingDatabase::new("analytics"))
            .with_count(4)
            .with_copied_rows(4);

        let report = provisioner.provision(&db, false).await.unwrap();
        assert_eq!(report.records_scanned, 3);
        assert_eq!(report.rows_loaded, 4);
        assert!(!report.verified);
    }

    #[tokio::test]
    async fn database_errors_abort_immediately() {
        let csv = csv_file(VISITS);
        let provisioner = Provisioner::new(plan(&csv));
        let db = RecordingDatabase::new("analytics").with_failure_on("CREATE TABLE");

        let err = provisioner.provision(&db, false).await.unwrap_err();
        assert!(matches!(err, AppError::DatabaseError(_)));

        let statements = db.statements().await;
        assert!(statements.last().unwrap().sql.starts_with("CREATE TABLE"));
        assert!(db.copies().await.is_empty());
    }

    #[tokio::test]
    async fn dry_run_lists_every_statement_without_secrets() {
        let csv = csv_file(VISITS);
        let provisioner = Provisioner::new(plan(&csv));

        let labels: Vec<String> = provisioner
            .dry_run()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.label)
            .collect();

        assert_eq!(labels[1], "CREATE DATABASE \"analytics\"");
        assert!(labels.iter().any(|l| l.starts_with("COPY \"staging\".\"visits\"")));
        assert!(labels.iter().any(|l| l == "CREATE ROLE \"editor\" LOGIN PASSWORD '********'"));
        assert!(labels.iter().all(|l| !l.contains("rw-pass")));
    }

    #[tokio::test]
    async fn malformed_csv_stops_before_any_statement() {
        let csv = csv_file("id,weekday\n1,Monday\n2\n");
        let provisioner = Provisioner::new(plan(&csv));
        let db = RecordingDatabase::new("analytics");

        let err = provisioner.provision(&db, false).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Profile(crate::error::ProfileError::MalformedRecord { .. })
        ));
        assert!(db.statements().await.is_empty());
    }
}
