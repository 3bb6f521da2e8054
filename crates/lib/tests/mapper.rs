mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use sqlmapper_lib::{Catalog, CatalogBuilder, RowBounds};
use sqlmapper_lib_core::driver::DbValue;
use sqlmapper_lib_core::reflection::{Navigator, TypeShape};
use sqlmapper_lib_core::value::{Value, param_map};

use common::{FakeConnection, Grid, Outcome, int, null, text};

fn catalog_with(mapper: &str, configure: impl FnOnce(&mut CatalogBuilder)) -> Arc<Catalog> {
    let mut builder = Catalog::builder();
    configure(&mut builder);
    builder.add_mapper_xml(mapper).unwrap();
    builder.build().unwrap()
}

fn register_person(builder: &mut CatalogBuilder) {
    builder.register_shape(
        TypeShape::builder("Person")
            .field("id", "long")
            .field("name", "string")
            .field("home", "Address")
            .field("addresses", "list<Address>")
            .build(),
    );
    builder.register_shape(
        TypeShape::builder("Address")
            .field("id", "long")
            .field("street", "string")
            .build(),
    );
}

#[test]
fn static_statement_binds_in_descriptor_order() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <select id="byId" resultType="int">SELECT id FROM t WHERE id = #{id}</select>
           </mapper>"#,
        |_| {},
    );
    let (connection, log) = FakeConnection::always(Grid::new(&["id"], vec![vec![int(7)]]));
    let mut session = catalog.open_session(connection);

    let rows = session
        .query("app.byId", param_map([("id", Value::Int(7))]))
        .unwrap();
    assert_eq!(rows, vec![Value::Int(7)]);

    let log = log.lock().unwrap();
    assert_eq!(
        log.executed,
        vec![(
            "SELECT id FROM t WHERE id = ?".to_string(),
            vec![DbValue::Int(7)]
        )]
    );
}

#[test]
fn where_strips_a_dangling_and_and_drops_empty_clauses() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <select id="find" resultType="map">
               SELECT * FROM t
               <where>
                 <if test="a != null">AND a = #{a}</if>
                 <if test="b != null">AND b = #{b}</if>
               </where>
             </select>
           </mapper>"#,
        |_| {},
    );

    let (connection, log) = FakeConnection::always(Grid::default());
    let mut session = catalog.open_session(connection);
    session
        .query("app.find", param_map([("a", Value::Int(1)), ("b", Value::Null)]))
        .unwrap();
    session
        .query("app.find", param_map([("a", Value::Null), ("b", Value::Null)]))
        .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(
        log.executed[0],
        ("SELECT * FROM t WHERE a = ?".to_string(), vec![DbValue::Int(1)])
    );
    assert_eq!(log.executed[1], ("SELECT * FROM t".to_string(), vec![]));
}

#[test]
fn foreach_expands_one_placeholder_per_element() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <select id="byIds" resultType="map">
               SELECT * FROM t WHERE id IN
               <foreach collection="ids" item="i" open="(" close=")" separator=",">#{i}</foreach>
             </select>
           </mapper>"#,
        |_| {},
    );

    let (connection, log) = FakeConnection::always(Grid::default());
    let mut session = catalog.open_session(connection);
    session
        .query(
            "app.byIds",
            param_map([("ids", Value::from(vec![3i64, 4, 5]))]),
        )
        .unwrap();
    session
        .query("app.byIds", param_map([("ids", Value::Array(vec![]))]))
        .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(
        log.executed[0],
        (
            "SELECT * FROM t WHERE id IN (?,?,?)".to_string(),
            vec![DbValue::Int(3), DbValue::Int(4), DbValue::Int(5)]
        )
    );
    assert_eq!(
        log.executed[1],
        ("SELECT * FROM t WHERE id IN ()".to_string(), vec![])
    );
}

#[test]
fn include_substitutes_fragment_with_property_bindings() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <sql id="cols">${alias}.id, ${alias}.name</sql>
             <select id="all" resultType="map">
               SELECT <include refid="cols"><property name="alias" value="p"/></include> FROM person p
             </select>
           </mapper>"#,
        |_| {},
    );

    let (connection, log) = FakeConnection::always(Grid::default());
    let mut session = catalog.open_session(connection);
    session.query("app.all", Value::Null).unwrap();

    assert_eq!(
        log.lock().unwrap().executed[0].0,
        "SELECT p.id, p.name FROM person p"
    );
}

#[test]
fn nested_collection_groups_child_rows_under_one_parent() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <resultMap id="person" type="Person">
               <id property="id" column="person_id"/>
               <result property="name" column="name"/>
               <collection property="addresses" ofType="Address">
                 <id property="id" column="addr_id"/>
                 <result property="street" column="street"/>
               </collection>
             </resultMap>
             <select id="all" resultMap="person">SELECT * FROM person_addresses</select>
           </mapper>"#,
        register_person,
    );

    let grid = Grid::new(
        &["person_id", "name", "addr_id", "street"],
        vec![
            vec![int(1), text("John"), int(1), text("Addr1")],
            vec![int(1), text("John"), int(2), text("Addr2")],
        ],
    );
    let (connection, _) = FakeConnection::always(grid);
    let mut session = catalog.open_session(connection);
    let rows = session.query("app.all", Value::Null).unwrap();

    assert_eq!(rows.len(), 1);
    let navigator = Navigator::new(catalog.shapes());
    let person = &rows[0];
    assert_eq!(navigator.get(person, "id").unwrap(), Value::Int(1));
    assert_eq!(navigator.get(person, "name").unwrap(), Value::from("John"));
    let addresses = navigator.get(person, "addresses").unwrap();
    let addresses = addresses.as_array().unwrap();
    assert_eq!(addresses.len(), 2);
    assert_eq!(
        navigator.get(person, "addresses[0].street").unwrap(),
        Value::from("Addr1")
    );
    assert_eq!(
        navigator.get(person, "addresses[1].id").unwrap(),
        Value::Int(2)
    );
}

#[test]
fn short_names_resolve_to_the_same_statement() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <select id="byId" resultType="int">SELECT id FROM t WHERE id = #{id}</select>
           </mapper>"#,
        |_| {},
    );
    let qualified = catalog.statement("app.byId").unwrap();
    let short = catalog.statement("byId").unwrap();
    assert!(Arc::ptr_eq(&qualified, &short));
}

#[test]
fn committed_cache_writes_are_visible_across_sessions() {
    let mapper = r#"<mapper namespace="app">
          <cache/>
          <select id="byId" resultType="int">SELECT id FROM t WHERE id = #{id}</select>
        </mapper>"#;
    let catalog = catalog_with(mapper, |_| {});
    let grid = Grid::new(&["id"], vec![vec![int(7)]]);

    let (conn_a, log_a) = FakeConnection::always(grid.clone());
    let mut session_a = catalog.open_session(conn_a);
    let parameter = param_map([("id", Value::Int(7))]);
    session_a.query("app.byId", parameter.clone()).unwrap();
    assert_eq!(log_a.lock().unwrap().executed.len(), 1);

    // Before A commits, another session still executes.
    let (conn_b, log_b) = FakeConnection::always(grid.clone());
    let mut session_b = catalog.open_session(conn_b);
    session_b.query("app.byId", parameter.clone()).unwrap();
    assert_eq!(log_b.lock().unwrap().executed.len(), 1);

    session_a.commit().unwrap();

    // After A commits, a fresh session reads the shared cache.
    let (conn_c, log_c) = FakeConnection::always(grid);
    let mut session_c = catalog.open_session(conn_c);
    let rows = session_c.query("app.byId", parameter).unwrap();
    assert_eq!(rows, vec![Value::Int(7)]);
    assert_eq!(log_c.lock().unwrap().executed.len(), 0);
}

#[test]
fn local_cache_short_circuits_repeated_queries() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <select id="byId" resultType="int">SELECT id FROM t WHERE id = #{id}</select>
           </mapper>"#,
        |_| {},
    );
    let (connection, log) = FakeConnection::always(Grid::new(&["id"], vec![vec![int(7)]]));
    let mut session = catalog.open_session(connection);
    let parameter = param_map([("id", Value::Int(7))]);
    session.query("app.byId", parameter.clone()).unwrap();
    session.query("app.byId", parameter.clone()).unwrap();
    assert_eq!(log.lock().unwrap().executed.len(), 1);

    // A different parameter is a different cache key.
    session
        .query("app.byId", param_map([("id", Value::Int(8))]))
        .unwrap();
    assert_eq!(log.lock().unwrap().executed.len(), 2);
}

#[test]
fn flushing_update_invalidates_the_namespace_cache() {
    let mapper = r#"<mapper namespace="app">
          <cache/>
          <select id="byId" resultType="int">SELECT id FROM t WHERE id = #{id}</select>
          <update id="touch">UPDATE t SET n = n + 1</update>
        </mapper>"#;
    let catalog = catalog_with(mapper, |_| {});
    let grid = Grid::new(&["id"], vec![vec![int(7)]]);

    let (conn_a, _) = FakeConnection::always(grid.clone());
    let mut session_a = catalog.open_session(conn_a);
    session_a
        .query("app.byId", param_map([("id", Value::Int(7))]))
        .unwrap();
    session_a.commit().unwrap();

    // The update flushes the namespace on commit.
    let (conn_b, _) = FakeConnection::create(Arc::new(|_, _| Outcome::Affected(1)));
    let mut session_b = catalog.open_session(conn_b);
    let mut no_param = Value::Null;
    session_b.update("app.touch", &mut no_param).unwrap();
    session_b.commit().unwrap();

    let (conn_c, log_c) = FakeConnection::always(grid);
    let mut session_c = catalog.open_session(conn_c);
    session_c
        .query("app.byId", param_map([("id", Value::Int(7))]))
        .unwrap();
    assert_eq!(log_c.lock().unwrap().executed.len(), 1);
}

#[test]
fn generated_keys_write_back_through_the_key_property() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <insert id="ins" parameterType="map" useGeneratedKeys="true" keyProperty="id">
               INSERT INTO t (name) VALUES (#{name})
             </insert>
           </mapper>"#,
        |_| {},
    );
    let (connection, log) = FakeConnection::create(Arc::new(|_, _| {
        Outcome::AffectedWithKeys(1, Grid::new(&["id"], vec![vec![int(42)]]))
    }));
    let mut session = catalog.open_session(connection);

    let mut parameter = param_map([("name", Value::from("John"))]);
    let affected = session.update("app.ins", &mut parameter).unwrap();
    assert_eq!(affected, 1);
    assert_eq!(
        log.lock().unwrap().executed[0],
        (
            "INSERT INTO t (name) VALUES (?)".to_string(),
            vec![DbValue::Text("John".to_string())]
        )
    );

    let navigator = Navigator::new(catalog.shapes());
    assert_eq!(navigator.get(&parameter, "id").unwrap(), Value::Int(42));
}

#[test]
fn lazy_nested_selects_run_on_first_property_access() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <resultMap id="person" type="Person">
               <id property="id" column="id"/>
               <result property="name" column="name"/>
               <association property="home" column="id" select="homeById" javaType="Address"/>
             </resultMap>
             <select id="byId" resultMap="person">SELECT id, name FROM person WHERE id = #{id}</select>
             <select id="homeById" resultType="map">SELECT street FROM address WHERE person_id = #{id}</select>
           </mapper>"#,
        |builder| {
            register_person(builder);
            builder
                .settings_mut()
                .apply("lazyLoadingEnabled", "true")
                .unwrap();
        },
    );

    let (connection, log) = FakeConnection::create(Arc::new(|sql, _| {
        if sql.contains("FROM address") {
            Outcome::Rows(Grid::new(&["street"], vec![vec![text("Lazy Lane")]]))
        } else {
            Outcome::Rows(Grid::new(&["id", "name"], vec![vec![int(1), text("John")]]))
        }
    }));
    let mut session = catalog.open_session(connection);

    let person = session
        .select_one("app.byId", param_map([("id", Value::Int(1))]))
        .unwrap()
        .unwrap();
    assert_eq!(log.lock().unwrap().executed.len(), 1);

    // First navigation through the deferred slot triggers the sub-select.
    let navigator = Navigator::new(catalog.shapes());
    assert_eq!(
        navigator.get(&person, "home.street").unwrap(),
        Value::from("Lazy Lane")
    );
    assert_eq!(log.lock().unwrap().executed.len(), 2);

    // Resolved once; further reads do not re-execute.
    navigator.get(&person, "home.street").unwrap();
    assert_eq!(log.lock().unwrap().executed.len(), 2);
}

#[test]
fn eager_nested_selects_run_inline() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <resultMap id="person" type="Person">
               <id property="id" column="id"/>
               <association property="home" column="id" select="homeById" javaType="Address"/>
             </resultMap>
             <select id="byId" resultMap="person">SELECT id FROM person WHERE id = #{id}</select>
             <select id="homeById" resultType="map">SELECT street FROM address WHERE person_id = #{id}</select>
           </mapper>"#,
        register_person,
    );

    let (connection, log) = FakeConnection::create(Arc::new(|sql, _| {
        if sql.contains("FROM address") {
            Outcome::Rows(Grid::new(&["street"], vec![vec![text("Main St")]]))
        } else {
            Outcome::Rows(Grid::new(&["id"], vec![vec![int(1)]]))
        }
    }));
    let mut session = catalog.open_session(connection);
    let person = session
        .select_one("app.byId", param_map([("id", Value::Int(1))]))
        .unwrap()
        .unwrap();

    assert_eq!(log.lock().unwrap().executed.len(), 2);
    let navigator = Navigator::new(catalog.shapes());
    assert_eq!(
        navigator.get(&person, "home.street").unwrap(),
        Value::from("Main St")
    );
}

#[test]
fn discriminator_routes_rows_to_case_maps() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <resultMap id="vehicle" type="map">
               <id property="id" column="id"/>
               <discriminator column="kind" javaType="string">
                 <case value="car"><result property="doors" column="doors"/></case>
                 <case value="bike"><result property="gears" column="gears"/></case>
               </discriminator>
             </resultMap>
             <select id="all" resultMap="vehicle">SELECT * FROM vehicle</select>
           </mapper>"#,
        |_| {},
    );

    let grid = Grid::new(
        &["id", "kind", "doors", "gears"],
        vec![
            vec![int(1), text("car"), int(4), null()],
            vec![int(2), text("bike"), null(), int(21)],
        ],
    );
    let (connection, _) = FakeConnection::always(grid);
    let mut session = catalog.open_session(connection);
    let rows = session.query("app.all", Value::Null).unwrap();

    let navigator = Navigator::new(catalog.shapes());
    assert_eq!(navigator.get(&rows[0], "doors").unwrap(), Value::Int(4));
    assert_eq!(navigator.get(&rows[0], "gears").unwrap(), Value::Null);
    assert_eq!(navigator.get(&rows[1], "gears").unwrap(), Value::Int(21));
}

#[test]
fn row_bounds_window_the_result_in_memory() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <select id="all" resultType="int">SELECT n FROM t</select>
           </mapper>"#,
        |_| {},
    );
    let grid = Grid::new(
        &["n"],
        (0..10).map(|n| vec![int(n)]).collect(),
    );
    let (connection, _) = FakeConnection::always(grid);
    let mut session = catalog.open_session(connection);

    let rows = session
        .query_bounded("app.all", Value::Null, RowBounds::new(3, 2))
        .unwrap();
    assert_eq!(rows, vec![Value::Int(3), Value::Int(4)]);
}

#[test]
fn auto_mapping_folds_underscores_when_configured() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <select id="one" resultType="User">SELECT * FROM users</select>
           </mapper>"#,
        |builder| {
            builder.register_shape(
                TypeShape::builder("User")
                    .field("userName", "string")
                    .build(),
            );
            builder
                .settings_mut()
                .apply("mapUnderscoreToCamelCase", "true")
                .unwrap();
        },
    );
    let (connection, _) =
        FakeConnection::always(Grid::new(&["user_name"], vec![vec![text("John")]]));
    let mut session = catalog.open_session(connection);
    let user = session.select_one("app.one", Value::Null).unwrap().unwrap();

    let navigator = Navigator::new(catalog.shapes());
    assert_eq!(
        navigator.get(&user, "userName").unwrap(),
        Value::from("John")
    );
}

#[test]
fn binding_parity_holds_for_compiled_statements() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <select id="find" resultType="map">
               SELECT * FROM t
               <where>
                 <if test="a != null">AND a = #{a}</if>
                 <if test="ids != null">AND id IN
                   <foreach collection="ids" item="i" open="(" close=")" separator=",">#{i}</foreach>
                 </if>
               </where>
             </select>
           </mapper>"#,
        |_| {},
    );

    let statement = catalog.statement("app.find").unwrap();
    for parameter in [
        param_map([("a", Value::Int(1)), ("ids", Value::from(vec![1i64, 2]))]),
        param_map([("a", Value::Null), ("ids", Value::from(vec![9i64]))]),
        param_map([("a", Value::Null), ("ids", Value::Null)]),
    ] {
        let bound = statement
            .source
            .bound_sql(catalog.shapes(), &parameter)
            .unwrap();
        let placeholders = bound.sql.matches('?').count();
        assert_eq!(placeholders, bound.descriptors.len());
    }
}

#[test]
fn unknown_statements_and_closed_sessions_error() {
    let catalog = catalog_with(
        r#"<mapper namespace="app">
             <select id="one" resultType="int">SELECT 1</select>
           </mapper>"#,
        |_| {},
    );
    let (connection, _) = FakeConnection::always(Grid::default());
    let mut session = catalog.open_session(connection);
    assert!(session.query("app.missing", Value::Null).is_err());

    session.close();
    assert!(session.query("app.one", Value::Null).is_err());
}
