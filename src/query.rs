//! SQL generation for the supported database dialects.
use crate::metadata::{Id, PropertyValue, TypeId, TypeKind};
use crate::metadata_store::options::{
    GetArtifactsOptions, GetContextsOptions, GetEventsOptions, GetExecutionsOptions,
    GetItemsOptions, GetTypesOptions, ItemOptions,
};
use sqlx::any::AnyArguments;
use sqlx::Arguments as _;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone)]
pub enum Query {
    Sqlite(SqliteQuery),
    Mysql(MysqlQuery),
    Postgres(PostgresQuery),
}

impl Query {
    pub fn sqlite() -> Self {
        Self::Sqlite(SqliteQuery)
    }

    pub fn mysql() -> Self {
        Self::Mysql(MysqlQuery)
    }

    pub fn postgres() -> Self {
        Self::Postgres(PostgresQuery)
    }

    /// Rewrites `?` placeholders into the form expected by the dialect.
    fn sql(&self, sql: &str) -> String {
        match self {
            Self::Postgres(_) => {
                let mut n = 0;
                let mut out = String::with_capacity(sql.len() + 8);
                for c in sql.chars() {
                    if c == '?' {
                        n += 1;
                        out += &format!("${}", n);
                    } else {
                        out.push(c);
                    }
                }
                out
            }
            _ => sql.to_owned(),
        }
    }

    pub fn create_tables(&self) -> &'static [&'static str] {
        match self {
            Self::Sqlite(x) => x.create_tables(),
            Self::Mysql(x) => x.create_tables(),
            Self::Postgres(x) => x.create_tables(),
        }
    }

    fn insert_or_ignore(&self, table: &str, columns: &str, n: usize) -> String {
        let sql = match self {
            Self::Sqlite(_) => format!(
                "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
                table,
                columns,
                params(n)
            ),
            Self::Mysql(_) => format!(
                "INSERT IGNORE INTO {} ({}) VALUES ({})",
                table,
                columns,
                params(n)
            ),
            Self::Postgres(_) => format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
                table,
                columns,
                params(n)
            ),
        };
        self.sql(&sql)
    }

    pub fn insert_or_ignore_attribution(&self) -> String {
        self.insert_or_ignore("Attribution", "context_id, artifact_id", 2)
    }

    pub fn insert_or_ignore_association(&self) -> String {
        self.insert_or_ignore("Association", "context_id, execution_id", 2)
    }

    pub fn insert_or_ignore_parent_context(&self) -> String {
        self.insert_or_ignore("ParentContext", "context_id, parent_context_id", 2)
    }

    pub fn insert_or_ignore_event(&self) -> String {
        self.insert_or_ignore(
            "Event",
            "artifact_id, execution_id, type, milliseconds_since_epoch",
            4,
        )
    }

    pub fn select_schema_version(&self) -> &'static str {
        "SELECT schema_version FROM MLMDEnv"
    }

    pub fn insert_schema_version(&self) -> String {
        self.insert_or_ignore("MLMDEnv", "schema_version", 1)
    }

    pub fn get_type_id(&self, item_id: Id) -> (String, AnyArguments) {
        let sql = format!(
            "SELECT type_id FROM {} WHERE id = ?",
            item_id.kind().item_table_name(),
        );
        let mut args = AnyArguments::default();
        args.add(item_id.get());
        (self.sql(&sql), args)
    }

    pub fn get_types(&self, type_kind: TypeKind, options: &GetTypesOptions) -> (String, AnyArguments) {
        let mut sql = "SELECT id, name FROM Type WHERE type_kind = ? ".to_owned();
        let mut args = AnyArguments::default();
        args.add(type_kind as i32);
        if let Some(name) = &options.name {
            sql += "AND name = ? ";
            args.add(name.clone());
        }
        if !options.ids.is_empty() {
            sql += &format!("AND id IN ({}) ", params(options.ids.len()));
            for id in &options.ids {
                args.add(id.get());
            }
        }
        sql += "ORDER BY id";
        (self.sql(&sql), args)
    }

    pub fn get_type_properties(&self) -> &'static str {
        "SELECT type_id, name, data_type FROM TypeProperty"
    }

    pub fn get_type_by_name(&self) -> String {
        self.sql("SELECT id, name FROM Type WHERE type_kind = ? AND name = ?")
    }

    pub fn get_type_properties_by_type_id(&self) -> String {
        self.sql("SELECT type_id, name, data_type FROM TypeProperty WHERE type_id = ?")
    }

    pub fn insert_type(&self) -> String {
        self.sql("INSERT INTO Type (type_kind, name) VALUES (?, ?)")
    }

    pub fn insert_type_property(&self) -> String {
        self.sql("INSERT INTO TypeProperty (type_id, name, data_type) VALUES (?, ?, ?)")
    }

    pub fn check_item_id(&self, type_kind: TypeKind) -> String {
        self.sql(&format!(
            "SELECT count(*) FROM {} WHERE id = ?",
            type_kind.item_table_name()
        ))
    }

    pub fn insert_item(&self, type_id: TypeId, options: &ItemOptions) -> (String, AnyArguments) {
        let current_millis = current_millis();

        let mut fields = vec![
            "type_id",
            "create_time_since_epoch",
            "last_update_time_since_epoch",
        ];
        let mut args = AnyArguments::default();
        args.add(type_id.get());
        args.add(current_millis);
        args.add(current_millis);

        if let Some(name) = &options.name {
            fields.push("name");
            args.add(name.clone());
        }
        for (name, value) in options.extra_fields() {
            fields.push(name);
            match value {
                QueryValue::Int(v) => args.add(v),
                QueryValue::Str(v) => args.add(v.to_owned()),
            }
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            options.type_kind.item_table_name(),
            fields.join(","),
            params(fields.len())
        );
        (self.sql(&sql), args)
    }

    pub fn update_item(&self, item_id: Id, options: &ItemOptions) -> (String, AnyArguments) {
        let mut fields = "last_update_time_since_epoch = ?".to_owned();
        let mut args = AnyArguments::default();
        args.add(current_millis());

        if let Some(v) = &options.name {
            fields += ", name = ?";
            args.add(v.clone());
        }
        for (name, value) in options.extra_fields() {
            fields += &format!(", {} = ?", name);
            match value {
                QueryValue::Int(v) => args.add(v),
                QueryValue::Str(v) => args.add(v.to_owned()),
            }
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            item_id.kind().item_table_name(),
            fields
        );
        args.add(item_id.get());

        (self.sql(&sql), args)
    }

    pub fn upsert_item_property(
        &self,
        item_id: Id,
        property_name: &str,
        value: &PropertyValue,
        is_custom: bool,
    ) -> (String, AnyArguments) {
        let sql = match self {
            Self::Sqlite(_) | Self::Postgres(_) => upsert_on_conflict_sql(item_id, value),
            Self::Mysql(x) => x.upsert_item_property_sql(item_id, value),
        };
        let mut args = AnyArguments::default();
        args.add(item_id.get());
        args.add(property_name.to_owned());
        args.add(is_custom);
        for _ in 0..2 {
            match value.clone() {
                PropertyValue::Int(v) => args.add(v),
                PropertyValue::Double(v) => args.add(v),
                PropertyValue::String(v) => args.add(v),
            }
        }
        (self.sql(&sql), args)
    }

    pub fn get_item_properties(
        &self,
        type_kind: TypeKind,
        ids: impl Iterator<Item = i32>,
    ) -> (String, AnyArguments) {
        let mut n = 0;
        let mut args = AnyArguments::default();
        for id in ids {
            args.add(id);
            n += 1;
        }

        let sql = format!(
            concat!(
                "SELECT {0}_id AS id, name, is_custom_property, int_value, double_value, string_value ",
                "FROM {1}Property ",
                "WHERE {0}_id IN ({2}) ",
                "ORDER BY {0}_id, name"
            ),
            type_kind,
            type_kind.item_table_name(),
            params(n.max(1))
        );
        if n == 0 {
            args.add(-1);
        }
        (self.sql(&sql), args)
    }

    pub fn get_items<'a>(&self, options: &'a GetItemsOptions) -> (String, AnyArguments<'a>) {
        let (sql, args) = match options {
            GetItemsOptions::Artifact(x) => get_artifacts(x),
            GetItemsOptions::Execution(x) => get_executions(x),
            GetItemsOptions::Context(x) => get_contexts(x),
        };
        (self.sql(&sql), args)
    }

    pub fn get_last_item_id(&self, type_kind: TypeKind) -> String {
        format!(
            "SELECT id FROM {} ORDER BY id DESC LIMIT 1",
            type_kind.item_table_name()
        )
    }

    pub fn check_item_name(
        &self,
        type_kind: TypeKind,
        type_id: TypeId,
        item_id: Option<Id>,
        item_name: &str,
    ) -> (String, AnyArguments) {
        let mut sql = format!(
            "SELECT count(*) FROM {} WHERE type_id = ? AND name = ?",
            type_kind.item_table_name()
        );
        let mut args = AnyArguments::default();
        args.add(type_id.get());
        args.add(item_name.to_owned());

        if let Some(item_id) = item_id {
            sql += " AND id != ?";
            args.add(item_id.get());
        }

        (self.sql(&sql), args)
    }

    pub fn get_events(&self, options: &GetEventsOptions) -> (String, AnyArguments) {
        let mut sql = "SELECT id, artifact_id, execution_id, type, milliseconds_since_epoch FROM Event "
            .to_owned();
        let mut args = AnyArguments::default();

        let mut conditions = Vec::new();
        if !options.artifact_ids.is_empty() {
            conditions.push(format!(
                "artifact_id IN ({})",
                params(options.artifact_ids.len())
            ));
            for id in &options.artifact_ids {
                args.add(id.get());
            }
        }
        if !options.execution_ids.is_empty() {
            conditions.push(format!(
                "execution_id IN ({})",
                params(options.execution_ids.len())
            ));
            for id in &options.execution_ids {
                args.add(id.get());
            }
        }
        if let Some(ty) = options.event_type {
            conditions.push("type = ?".to_owned());
            args.add(ty as i32);
        }
        if !conditions.is_empty() {
            sql += &format!("WHERE {} ", conditions.join(" AND "));
        }
        sql += "ORDER BY id";
        (self.sql(&sql), args)
    }
}

fn get_artifacts(options: &GetArtifactsOptions) -> (String, AnyArguments) {
    let mut sql = concat!(
        "SELECT A.id, A.type_id, T.name AS type_name, A.name, A.uri, A.state, ",
        "A.create_time_since_epoch, A.last_update_time_since_epoch ",
        "FROM Artifact AS A JOIN Type AS T ON A.type_id = T.id "
    )
    .to_owned();
    let mut args = AnyArguments::default();

    if options.context_id.is_some() {
        sql += "JOIN Attribution AS C ON A.id = C.artifact_id ";
    }

    let mut conditions = Vec::new();
    if let Some(v) = &options.type_name {
        conditions.push("T.name = ?".to_owned());
        args.add(v.clone());
    }
    if let Some(v) = &options.artifact_name {
        conditions.push("A.name = ?".to_owned());
        args.add(v.clone());
    }
    if !options.artifact_ids.is_empty() {
        conditions.push(format!("A.id IN ({})", params(options.artifact_ids.len())));
        for id in &options.artifact_ids {
            args.add(id.get());
        }
    }
    if let Some(v) = &options.uri {
        conditions.push("A.uri = ?".to_owned());
        args.add(v.clone());
    }
    if let Some(v) = options.context_id {
        conditions.push("C.context_id = ?".to_owned());
        args.add(v.get());
    }

    if !conditions.is_empty() {
        sql += &format!("WHERE {} ", conditions.join(" AND "));
    }
    sql += "ORDER BY A.id";
    (sql, args)
}

fn get_executions(options: &GetExecutionsOptions) -> (String, AnyArguments) {
    let mut sql = concat!(
        "SELECT A.id, A.type_id, T.name AS type_name, A.name, A.last_known_state, ",
        "A.create_time_since_epoch, A.last_update_time_since_epoch ",
        "FROM Execution AS A JOIN Type AS T ON A.type_id = T.id "
    )
    .to_owned();
    let mut args = AnyArguments::default();

    if options.context_id.is_some() {
        sql += "JOIN Association AS C ON A.id = C.execution_id ";
    }

    let mut conditions = Vec::new();
    if let Some(v) = &options.type_name {
        conditions.push("T.name = ?".to_owned());
        args.add(v.clone());
    }
    if let Some(v) = &options.execution_name {
        conditions.push("A.name = ?".to_owned());
        args.add(v.clone());
    }
    if !options.execution_ids.is_empty() {
        conditions.push(format!("A.id IN ({})", params(options.execution_ids.len())));
        for id in &options.execution_ids {
            args.add(id.get());
        }
    }
    if let Some(v) = options.context_id {
        conditions.push("C.context_id = ?".to_owned());
        args.add(v.get());
    }

    if !conditions.is_empty() {
        sql += &format!("WHERE {} ", conditions.join(" AND "));
    }
    sql += "ORDER BY A.id";
    (sql, args)
}

fn get_contexts(options: &GetContextsOptions) -> (String, AnyArguments) {
    let mut sql = concat!(
        "SELECT A.id, A.type_id, T.name AS type_name, A.name, ",
        "A.create_time_since_epoch, A.last_update_time_since_epoch ",
        "FROM Context AS A JOIN Type AS T ON A.type_id = T.id "
    )
    .to_owned();
    let mut args = AnyArguments::default();

    if !options.artifact_ids.is_empty() {
        sql += "JOIN Attribution AS B ON A.id = B.context_id ";
    }
    if !options.execution_ids.is_empty() {
        sql += "JOIN Association AS C ON A.id = C.context_id ";
    }
    if options.parent_context_id.is_some() {
        sql += "JOIN ParentContext AS P ON A.id = P.context_id ";
    }
    if options.child_context_id.is_some() {
        sql += "JOIN ParentContext AS Q ON A.id = Q.parent_context_id ";
    }

    let mut conditions = Vec::new();
    if let Some(v) = &options.type_name {
        conditions.push("T.name = ?".to_owned());
        args.add(v.clone());
    }
    if let Some(v) = &options.context_name {
        conditions.push("A.name = ?".to_owned());
        args.add(v.clone());
    }
    if !options.context_ids.is_empty() {
        conditions.push(format!("A.id IN ({})", params(options.context_ids.len())));
        for id in &options.context_ids {
            args.add(id.get());
        }
    }
    if !options.artifact_ids.is_empty() {
        conditions.push(format!(
            "B.artifact_id IN ({})",
            params(options.artifact_ids.len())
        ));
        for id in &options.artifact_ids {
            args.add(id.get());
        }
    }
    if !options.execution_ids.is_empty() {
        conditions.push(format!(
            "C.execution_id IN ({})",
            params(options.execution_ids.len())
        ));
        for id in &options.execution_ids {
            args.add(id.get());
        }
    }
    if let Some(v) = options.parent_context_id {
        conditions.push("P.parent_context_id = ?".to_owned());
        args.add(v.get());
    }
    if let Some(v) = options.child_context_id {
        conditions.push("Q.context_id = ?".to_owned());
        args.add(v.get());
    }

    if !conditions.is_empty() {
        sql += &format!("WHERE {} ", conditions.join(" AND "));
    }
    sql += "ORDER BY A.id";
    (sql, args)
}

fn upsert_on_conflict_sql(item_id: Id, value: &PropertyValue) -> String {
    format!(
        concat!(
            "INSERT INTO {3}Property ",
            "({4}_id, name, is_custom_property, int_value, double_value, string_value) ",
            "VALUES (?, ?, ?, {0}, {1}, {2}) ",
            "ON CONFLICT ({4}_id, name, is_custom_property) ",
            "DO UPDATE SET int_value = {0}, double_value = {1}, string_value = {2}"
        ),
        maybe_null(value.as_int().is_some(), "?"),
        maybe_null(value.as_double().is_some(), "?"),
        maybe_null(value.as_string().is_some(), "?"),
        item_id.kind().item_table_name(),
        item_id.kind()
    )
}

#[derive(Debug, Clone)]
pub struct SqliteQuery;

impl SqliteQuery {
    fn create_tables(&self) -> &'static [&'static str] {
        &[
            concat!(
                " CREATE TABLE IF NOT EXISTS `Type` ( ",
                "   `id` INTEGER PRIMARY KEY AUTOINCREMENT, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `type_kind` TINYINT(1) NOT NULL, ",
                "   `description` TEXT, ",
                "   UNIQUE(`type_kind`, `name`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `TypeProperty` ( ",
                "   `type_id` INT NOT NULL, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `data_type` INT NULL, ",
                " PRIMARY KEY (`type_id`, `name`)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Artifact` ( ",
                "   `id` INTEGER PRIMARY KEY AUTOINCREMENT, ",
                "   `type_id` INT NOT NULL, ",
                "   `uri` TEXT, ",
                "   `state` INT, ",
                "   `name` VARCHAR(255), ",
                "   `create_time_since_epoch` INT NOT NULL DEFAULT 0, ",
                "   `last_update_time_since_epoch` INT NOT NULL DEFAULT 0, ",
                "   UNIQUE(`type_id`, `name`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `ArtifactProperty` ( ",
                "   `artifact_id` INT NOT NULL, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `is_custom_property` TINYINT(1) NOT NULL, ",
                "   `int_value` INT, ",
                "   `double_value` DOUBLE, ",
                "   `string_value` TEXT, ",
                " PRIMARY KEY (`artifact_id`, `name`, `is_custom_property`)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Execution` ( ",
                "   `id` INTEGER PRIMARY KEY AUTOINCREMENT, ",
                "   `type_id` INT NOT NULL, ",
                "   `last_known_state` INT, ",
                "   `name` VARCHAR(255), ",
                "   `create_time_since_epoch` INT NOT NULL DEFAULT 0, ",
                "   `last_update_time_since_epoch` INT NOT NULL DEFAULT 0, ",
                "   UNIQUE(`type_id`, `name`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `ExecutionProperty` ( ",
                "   `execution_id` INT NOT NULL, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `is_custom_property` TINYINT(1) NOT NULL, ",
                "   `int_value` INT, ",
                "   `double_value` DOUBLE, ",
                "   `string_value` TEXT, ",
                " PRIMARY KEY (`execution_id`, `name`, `is_custom_property`)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Context` ( ",
                "   `id` INTEGER PRIMARY KEY AUTOINCREMENT, ",
                "   `type_id` INT NOT NULL, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `create_time_since_epoch` INT NOT NULL DEFAULT 0, ",
                "   `last_update_time_since_epoch` INT NOT NULL DEFAULT 0, ",
                "   UNIQUE(`type_id`, `name`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `ContextProperty` ( ",
                "   `context_id` INT NOT NULL, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `is_custom_property` TINYINT(1) NOT NULL, ",
                "   `int_value` INT, ",
                "   `double_value` DOUBLE, ",
                "   `string_value` TEXT, ",
                " PRIMARY KEY (`context_id`, `name`, `is_custom_property`)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `ParentContext` ( ",
                "   `context_id` INT NOT NULL, ",
                "   `parent_context_id` INT NOT NULL, ",
                " PRIMARY KEY (`context_id`, `parent_context_id`)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Event` ( ",
                "   `id` INTEGER PRIMARY KEY AUTOINCREMENT, ",
                "   `artifact_id` INT NOT NULL, ",
                "   `execution_id` INT NOT NULL, ",
                "   `type` INT NOT NULL, ",
                "   `milliseconds_since_epoch` INT, ",
                "   UNIQUE(`artifact_id`, `execution_id`, `type`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Association` ( ",
                "   `id` INTEGER PRIMARY KEY AUTOINCREMENT, ",
                "   `context_id` INT NOT NULL, ",
                "   `execution_id` INT NOT NULL, ",
                "   UNIQUE(`context_id`, `execution_id`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Attribution` ( ",
                "   `id` INTEGER PRIMARY KEY AUTOINCREMENT, ",
                "   `context_id` INT NOT NULL, ",
                "   `artifact_id` INT NOT NULL, ",
                "   UNIQUE(`context_id`, `artifact_id`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `MLMDEnv` ( ",
                "   `schema_version` INTEGER PRIMARY KEY ",
                " ); "
            ),
            concat!(
                " CREATE INDEX IF NOT EXISTS `idx_artifact_uri` ",
                " ON `Artifact`(`uri`); "
            ),
            concat!(
                " CREATE INDEX IF NOT EXISTS ",
                "   `idx_artifact_last_update_time_since_epoch` ",
                " ON `Artifact`(`last_update_time_since_epoch`); "
            ),
            concat!(
                " CREATE INDEX IF NOT EXISTS `idx_event_artifact_id` ",
                " ON `Event`(`artifact_id`); "
            ),
            concat!(
                " CREATE INDEX IF NOT EXISTS `idx_event_execution_id` ",
                " ON `Event`(`execution_id`); "
            ),
            concat!(
                " CREATE INDEX IF NOT EXISTS `idx_parentcontext_parent_context_id` ",
                " ON `ParentContext`(`parent_context_id`); "
            ),
            concat!(
                " CREATE INDEX IF NOT EXISTS ",
                "   `idx_execution_last_update_time_since_epoch` ",
                " ON `Execution`(`last_update_time_since_epoch`); "
            ),
            concat!(
                " CREATE INDEX IF NOT EXISTS ",
                "   `idx_context_last_update_time_since_epoch` ",
                " ON `Context`(`last_update_time_since_epoch`); "
            ),
            concat!(
                " CREATE INDEX IF NOT EXISTS `idx_execution_property_string` ",
                " ON `ExecutionProperty`(`name`, `is_custom_property`, `string_value`) ",
                " WHERE `string_value` IS NOT NULL; "
            ),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct MysqlQuery;

impl MysqlQuery {
    fn create_tables(&self) -> &'static [&'static str] {
        &[
            concat!(
                " CREATE TABLE IF NOT EXISTS `Type` ( ",
                "   `id` INT PRIMARY KEY AUTO_INCREMENT, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `type_kind` TINYINT(1) NOT NULL, ",
                "   `description` TEXT, ",
                "   CONSTRAINT UniqueTypeKindName UNIQUE(`type_kind`, `name`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `TypeProperty` ( ",
                "   `type_id` INT NOT NULL, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `data_type` INT NULL, ",
                " PRIMARY KEY (`type_id`, `name`)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Artifact` ( ",
                "   `id` INTEGER PRIMARY KEY AUTO_INCREMENT, ",
                "   `type_id` INT NOT NULL, ",
                "   `uri` TEXT, ",
                "   `state` INT, ",
                "   `name` VARCHAR(255), ",
                "   `create_time_since_epoch` BIGINT NOT NULL DEFAULT 0, ",
                "   `last_update_time_since_epoch` BIGINT NOT NULL DEFAULT 0, ",
                "   CONSTRAINT UniqueArtifactTypeName UNIQUE(`type_id`, `name`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `ArtifactProperty` ( ",
                "   `artifact_id` INT NOT NULL, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `is_custom_property` TINYINT(1) NOT NULL, ",
                "   `int_value` BIGINT, ",
                "   `double_value` DOUBLE, ",
                "   `string_value` TEXT, ",
                " PRIMARY KEY (`artifact_id`, `name`, `is_custom_property`)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Execution` ( ",
                "   `id` INTEGER PRIMARY KEY AUTO_INCREMENT, ",
                "   `type_id` INT NOT NULL, ",
                "   `last_known_state` INT, ",
                "   `name` VARCHAR(255), ",
                "   `create_time_since_epoch` BIGINT NOT NULL DEFAULT 0, ",
                "   `last_update_time_since_epoch` BIGINT NOT NULL DEFAULT 0, ",
                "   CONSTRAINT UniqueExecutionTypeName UNIQUE(`type_id`, `name`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `ExecutionProperty` ( ",
                "   `execution_id` INT NOT NULL, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `is_custom_property` TINYINT(1) NOT NULL, ",
                "   `int_value` BIGINT, ",
                "   `double_value` DOUBLE, ",
                "   `string_value` TEXT, ",
                " PRIMARY KEY (`execution_id`, `name`, `is_custom_property`)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Context` ( ",
                "   `id` INTEGER PRIMARY KEY AUTO_INCREMENT, ",
                "   `type_id` INT NOT NULL, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `create_time_since_epoch` BIGINT NOT NULL DEFAULT 0, ",
                "   `last_update_time_since_epoch` BIGINT NOT NULL DEFAULT 0, ",
                "   UNIQUE(`type_id`, `name`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `ContextProperty` ( ",
                "   `context_id` INT NOT NULL, ",
                "   `name` VARCHAR(255) NOT NULL, ",
                "   `is_custom_property` TINYINT(1) NOT NULL, ",
                "   `int_value` BIGINT, ",
                "   `double_value` DOUBLE, ",
                "   `string_value` TEXT, ",
                " PRIMARY KEY (`context_id`, `name`, `is_custom_property`)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `ParentContext` ( ",
                "   `context_id` INT NOT NULL, ",
                "   `parent_context_id` INT NOT NULL, ",
                " PRIMARY KEY (`context_id`, `parent_context_id`)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Event` ( ",
                "   `id` INTEGER PRIMARY KEY AUTO_INCREMENT, ",
                "   `artifact_id` INT NOT NULL, ",
                "   `execution_id` INT NOT NULL, ",
                "   `type` INT NOT NULL, ",
                "   `milliseconds_since_epoch` BIGINT, ",
                "   CONSTRAINT UniqueEvent UNIQUE(`artifact_id`, `execution_id`, `type`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Association` ( ",
                "   `id` INTEGER PRIMARY KEY AUTO_INCREMENT, ",
                "   `context_id` INT NOT NULL, ",
                "   `execution_id` INT NOT NULL, ",
                "   UNIQUE(`context_id`, `execution_id`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `Attribution` ( ",
                "   `id` INTEGER PRIMARY KEY AUTO_INCREMENT, ",
                "   `context_id` INT NOT NULL, ",
                "   `artifact_id` INT NOT NULL, ",
                "   UNIQUE(`context_id`, `artifact_id`) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS `MLMDEnv` ( ",
                "   `schema_version` INTEGER PRIMARY KEY ",
                " ); "
            ),
            concat!(
                " ALTER TABLE `Artifact` ",
                "  ADD INDEX `idx_artifact_uri`(`uri`(255)), ",
                "  ADD INDEX `idx_artifact_last_update_time_since_epoch` ",
                "             (`last_update_time_since_epoch`); "
            ),
            concat!(
                " ALTER TABLE `Event` ",
                " ADD INDEX `idx_event_artifact_id` (`artifact_id`), ",
                " ADD INDEX `idx_event_execution_id` (`execution_id`); "
            ),
            concat!(
                " ALTER TABLE `ParentContext` ",
                " ADD INDEX ",
                "   `idx_parentcontext_parent_context_id` (`parent_context_id`); "
            ),
            concat!(
                " ALTER TABLE `Execution` ",
                "  ADD INDEX `idx_execution_last_update_time_since_epoch` ",
                "             (`last_update_time_since_epoch`); "
            ),
            concat!(
                " ALTER TABLE `Context` ",
                "  ADD INDEX `idx_context_last_update_time_since_epoch` ",
                "             (`last_update_time_since_epoch`); "
            ),
        ]
    }

    fn upsert_item_property_sql(&self, item_id: Id, value: &PropertyValue) -> String {
        format!(
            concat!(
                "INSERT INTO {3}Property ",
                "({4}_id, name, is_custom_property, int_value, double_value, string_value) ",
                "VALUES (?, ?, ?, {0}, {1}, {2}) ",
                "ON DUPLICATE KEY ",
                "UPDATE int_value = {0}, double_value = {1}, string_value = {2}"
            ),
            maybe_null(value.as_int().is_some(), "?"),
            maybe_null(value.as_double().is_some(), "?"),
            maybe_null(value.as_string().is_some(), "?"),
            item_id.kind().item_table_name(),
            item_id.kind()
        )
    }
}

#[derive(Debug, Clone)]
pub struct PostgresQuery;

impl PostgresQuery {
    fn create_tables(&self) -> &'static [&'static str] {
        &[
            concat!(
                " CREATE TABLE IF NOT EXISTS Type ( ",
                "   id SERIAL PRIMARY KEY, ",
                "   name VARCHAR(255) NOT NULL, ",
                "   type_kind INT NOT NULL, ",
                "   description TEXT, ",
                "   UNIQUE(type_kind, name) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS TypeProperty ( ",
                "   type_id INT NOT NULL, ",
                "   name VARCHAR(255) NOT NULL, ",
                "   data_type INT NULL, ",
                " PRIMARY KEY (type_id, name)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS Artifact ( ",
                "   id SERIAL PRIMARY KEY, ",
                "   type_id INT NOT NULL, ",
                "   uri TEXT, ",
                "   state INT, ",
                "   name VARCHAR(255), ",
                "   create_time_since_epoch BIGINT NOT NULL DEFAULT 0, ",
                "   last_update_time_since_epoch BIGINT NOT NULL DEFAULT 0, ",
                "   UNIQUE(type_id, name) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS ArtifactProperty ( ",
                "   artifact_id INT NOT NULL, ",
                "   name VARCHAR(255) NOT NULL, ",
                "   is_custom_property BOOLEAN NOT NULL, ",
                "   int_value BIGINT, ",
                "   double_value DOUBLE PRECISION, ",
                "   string_value TEXT, ",
                " PRIMARY KEY (artifact_id, name, is_custom_property)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS Execution ( ",
                "   id SERIAL PRIMARY KEY, ",
                "   type_id INT NOT NULL, ",
                "   last_known_state INT, ",
                "   name VARCHAR(255), ",
                "   create_time_since_epoch BIGINT NOT NULL DEFAULT 0, ",
                "   last_update_time_since_epoch BIGINT NOT NULL DEFAULT 0, ",
                "   UNIQUE(type_id, name) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS ExecutionProperty ( ",
                "   execution_id INT NOT NULL, ",
                "   name VARCHAR(255) NOT NULL, ",
                "   is_custom_property BOOLEAN NOT NULL, ",
                "   int_value BIGINT, ",
                "   double_value DOUBLE PRECISION, ",
                "   string_value TEXT, ",
                " PRIMARY KEY (execution_id, name, is_custom_property)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS Context ( ",
                "   id SERIAL PRIMARY KEY, ",
                "   type_id INT NOT NULL, ",
                "   name VARCHAR(255) NOT NULL, ",
                "   create_time_since_epoch BIGINT NOT NULL DEFAULT 0, ",
                "   last_update_time_since_epoch BIGINT NOT NULL DEFAULT 0, ",
                "   UNIQUE(type_id, name) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS ContextProperty ( ",
                "   context_id INT NOT NULL, ",
                "   name VARCHAR(255) NOT NULL, ",
                "   is_custom_property BOOLEAN NOT NULL, ",
                "   int_value BIGINT, ",
                "   double_value DOUBLE PRECISION, ",
                "   string_value TEXT, ",
                " PRIMARY KEY (context_id, name, is_custom_property)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS ParentContext ( ",
                "   context_id INT NOT NULL, ",
                "   parent_context_id INT NOT NULL, ",
                " PRIMARY KEY (context_id, parent_context_id)); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS Event ( ",
                "   id SERIAL PRIMARY KEY, ",
                "   artifact_id INT NOT NULL, ",
                "   execution_id INT NOT NULL, ",
                "   type INT NOT NULL, ",
                "   milliseconds_since_epoch BIGINT, ",
                "   UNIQUE(artifact_id, execution_id, type) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS Association ( ",
                "   id SERIAL PRIMARY KEY, ",
                "   context_id INT NOT NULL, ",
                "   execution_id INT NOT NULL, ",
                "   UNIQUE(context_id, execution_id) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS Attribution ( ",
                "   id SERIAL PRIMARY KEY, ",
                "   context_id INT NOT NULL, ",
                "   artifact_id INT NOT NULL, ",
                "   UNIQUE(context_id, artifact_id) ",
                " ); "
            ),
            concat!(
                " CREATE TABLE IF NOT EXISTS MLMDEnv ( ",
                "   schema_version INTEGER PRIMARY KEY ",
                " ); "
            ),
            " CREATE INDEX IF NOT EXISTS idx_artifact_uri ON Artifact(uri); ",
            concat!(
                " CREATE INDEX IF NOT EXISTS idx_artifact_last_update_time_since_epoch ",
                " ON Artifact(last_update_time_since_epoch); "
            ),
            " CREATE INDEX IF NOT EXISTS idx_event_artifact_id ON Event(artifact_id); ",
            " CREATE INDEX IF NOT EXISTS idx_event_execution_id ON Event(execution_id); ",
            concat!(
                " CREATE INDEX IF NOT EXISTS idx_parentcontext_parent_context_id ",
                " ON ParentContext(parent_context_id); "
            ),
            concat!(
                " CREATE INDEX IF NOT EXISTS idx_execution_last_update_time_since_epoch ",
                " ON Execution(last_update_time_since_epoch); "
            ),
            concat!(
                " CREATE INDEX IF NOT EXISTS idx_context_last_update_time_since_epoch ",
                " ON Context(last_update_time_since_epoch); "
            ),
        ]
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct Type {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct TypeProperty {
    pub type_id: i32,
    pub name: String,
    pub data_type: i32,
}

#[derive(Debug)]
pub enum QueryValue<'a> {
    Int(i32),
    Str(&'a str),
}

#[derive(Debug, sqlx::FromRow)]
pub struct Property {
    pub id: i32,
    pub name: String,
    pub is_custom_property: bool,
    pub int_value: Option<i64>,
    pub double_value: Option<f64>,
    pub string_value: Option<String>,
}

impl Property {
    pub fn into_name_and_value(self) -> Result<(String, PropertyValue), sqlx::Error> {
        match self {
            Self {
                name,
                int_value: Some(v),
                double_value: None,
                string_value: None,
                ..
            } => Ok((name, PropertyValue::Int(v))),
            Self {
                name,
                int_value: None,
                double_value: Some(v),
                string_value: None,
                ..
            } => Ok((name, PropertyValue::Double(v))),
            Self {
                name,
                int_value: None,
                double_value: None,
                string_value: Some(v),
                ..
            } => Ok((name, PropertyValue::String(v))),
            _ => Err(sqlx::Error::Decode(
                anyhow::anyhow!("a property must have just one value: {:?}", self).into(),
            )),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct Event {
    pub id: i32,
    #[sqlx(rename = "type")]
    pub ty: i32,
    pub artifact_id: i32,
    pub execution_id: i32,
    pub milliseconds_since_epoch: Option<i64>,
}

pub trait InsertProperty {
    fn insert_property(&mut self, is_custom: bool, name: String, value: PropertyValue);
}

fn maybe_null(b: bool, s: &str) -> &str {
    if b {
        s
    } else {
        "NULL"
    }
}

pub(crate) fn current_millis() -> i64 {
    UNIX_EPOCH.elapsed().unwrap_or_default().as_millis() as i64
}

fn params(n: usize) -> String {
    (0..n).map(|_| "?").collect::<Vec<_>>().join(",")
}
