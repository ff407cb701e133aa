//! Static catalogue of the metric datasets a `METRIC_CONDITION` rule may reference, plus the
//! load-time validation that checks rule configs against it.

use serde::Serialize;

use super::domain::{CampaignRule, RuleScope};
use super::evaluation::{MetricOperator, RuleCondition, RuleConfig, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Number,
    Text,
    Boolean,
}

impl FieldType {
    /// Booleans are stored as `"true"`/`"false"` flags and compare as text.
    pub const fn value_type(self) -> ValueType {
        match self {
            Self::Number => ValueType::Number,
            Self::Text | Self::Boolean => ValueType::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DatasetField {
    pub value: &'static str,
    pub label: &'static str,
    pub path: &'static [&'static str],
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// Rule-config parameter that selects one entry of a keyed dataset
/// (`prima_minima_mxn: 25000` → `prima_25000`).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LookupParam {
    pub param: &'static str,
    pub prefix: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DatasetDefinition {
    pub key: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub scopes: &'static [RuleScope],
    pub fields: &'static [DatasetField],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupParam>,
}

impl DatasetDefinition {
    pub fn field(&self, value: &str) -> Option<&'static DatasetField> {
        self.fields.iter().find(|field| field.value == value)
    }

    pub fn allows_scope(&self, scope: RuleScope) -> bool {
        self.scopes.contains(&scope)
    }
}

const GOAL: &[RuleScope] = &[RuleScope::Goal];
const ELIGIBILITY: &[RuleScope] = &[RuleScope::Eligibility];
const BOTH: &[RuleScope] = &[RuleScope::Eligibility, RuleScope::Goal];

const fn number(
    value: &'static str,
    label: &'static str,
    path: &'static [&'static str],
) -> DatasetField {
    DatasetField {
        value,
        label,
        path,
        field_type: FieldType::Number,
    }
}

const fn text(
    value: &'static str,
    label: &'static str,
    path: &'static [&'static str],
) -> DatasetField {
    DatasetField {
        value,
        label,
        path,
        field_type: FieldType::Text,
    }
}

const fn boolean(
    value: &'static str,
    label: &'static str,
    path: &'static [&'static str],
) -> DatasetField {
    DatasetField {
        value,
        label,
        path,
        field_type: FieldType::Boolean,
    }
}

/// Flag-style custom dataset whose single `cumple` column is precomputed by the ETL.
macro_rules! flag_dataset {
    ($key:literal, $label:literal, $description:literal, $scopes:expr) => {
        DatasetDefinition {
            key: $key,
            label: $label,
            description: $description,
            scopes: $scopes,
            fields: &[text(
                "cumple",
                "Cumple condición",
                &["datasets", $key, "cumple"],
            )],
            lookup: None,
        }
    };
    ($key:literal, $label:literal, $description:literal, $scopes:expr, $($extra:expr),+) => {
        DatasetDefinition {
            key: $key,
            label: $label,
            description: $description,
            scopes: $scopes,
            fields: &[
                text("cumple", "Cumple condición", &["datasets", $key, "cumple"]),
                $($extra),+
            ],
            lookup: None,
        }
    };
}

pub static DATASET_DEFINITIONS: &[DatasetDefinition] = &[
    DatasetDefinition {
        key: "polizas",
        label: "Producción pólizas y primas",
        description: "Métricas agregadas de pólizas emitidas por el asesor",
        scopes: GOAL,
        fields: &[
            number("polizas_total", "Pólizas emitidas", &["polizas", "total"]),
            number("polizas_vigentes", "Pólizas vigentes", &["polizas", "vigentes"]),
            number("polizas_anuladas", "Pólizas anuladas", &["polizas", "anuladas"]),
            number("prima_total_mxn", "Prima total (MXN)", &["polizas", "prima_total_mxn"]),
            number("prima_vigente_mxn", "Prima vigente (MXN)", &["polizas", "prima_vigente_mxn"]),
            number("prima_promedio_mxn", "Prima promedio (MXN)", &["polizas", "prima_promedio_mxn"]),
            number("comision_base_mxn", "Comisión base (MXN)", &["polizas", "comision_base_mxn"]),
            number("ingresos_mxn", "Ingresos totales (MXN)", &["polizas", "ingresos_mxn"]),
            number("puntos_totales", "Puntos totales", &["polizas", "puntos_totales"]),
            number("momentum_vita", "Momentum Vita", &["polizas", "momentum_vita"]),
        ],
        lookup: None,
    },
    DatasetDefinition {
        key: "prospectos",
        label: "Embudo de prospectos y reclutas",
        description: "Funnel de prospectos y conversión a Reclutas de Calidad",
        scopes: GOAL,
        fields: &[
            number("prospectos_total", "Prospectos totales", &["rc", "prospectos_total"]),
            number("prospectos_con_cita", "Prospectos con cita", &["rc", "prospectos_con_cita"]),
            number("prospectos_seguimiento", "Prospectos en seguimiento", &["rc", "prospectos_seguimiento"]),
            number("prospectos_descartados", "Prospectos descartados", &["rc", "prospectos_descartados"]),
            number("reclutas_calidad", "Reclutas de calidad", &["rc", "reclutas_calidad"]),
            number("reclutas_calidad_ratio", "% reclutas de calidad", &["rc", "reclutas_calidad_ratio"]),
        ],
        lookup: None,
    },
    DatasetDefinition {
        key: "candidatos",
        label: "Estado de candidatos conectados",
        description: "Estado de candidatos vinculados al asesor",
        scopes: ELIGIBILITY,
        fields: &[
            number("total", "Candidatos totales", &["candidatos", "total"]),
            number("activos", "Candidatos activos", &["candidatos", "activos"]),
            number("eliminados", "Candidatos eliminados", &["candidatos", "eliminados"]),
            text("ultimo_mes_conexion", "Mes de conexión", &["candidatos", "ultimo_mes_conexion"]),
        ],
        lookup: None,
    },
    DatasetDefinition {
        key: "planificacion",
        label: "Planeación semanal asesores",
        description: "Información de planeación semanal capturada por el asesor",
        scopes: ELIGIBILITY,
        fields: &[
            number("planes_total", "Planes registrados", &["planificacion", "planes_total"]),
            text("ultima_semana", "Última semana planificada", &["planificacion", "ultima_semana"]),
            text("ultima_actualizacion", "Última actualización", &["planificacion", "ultima_actualizacion"]),
            number("prima_promedio", "Prima que puede ganar", &["planificacion", "prima_promedio"]),
            number("porcentaje_comision", "Porcentaje comisión", &["planificacion", "porcentaje_comision"]),
        ],
        lookup: None,
    },
    DatasetDefinition {
        key: "clientes",
        label: "Altas de clientes",
        description: "Altas y totales de clientes asociados al asesor",
        scopes: GOAL,
        fields: &[
            number("total", "Clientes totales", &["clientes", "total"]),
            number("nuevos_30_dias", "Altas últimos 30 días", &["clientes", "nuevos_30_dias"]),
            number("nuevos_90_dias", "Altas últimos 90 días", &["clientes", "nuevos_90_dias"]),
            text("ultima_alta", "Último cliente creado", &["clientes", "ultima_alta"]),
        ],
        lookup: None,
    },
    DatasetDefinition {
        key: "cancelaciones",
        label: "Persistencia y cancelaciones",
        description: "Índices de persistencia y cancelaciones calculados por la ETL",
        scopes: GOAL,
        fields: &[
            number("indice_limra", "Índice LIMRA", &["cancelaciones", "indice_limra"]),
            number("indice_igc", "Índice IGC", &["cancelaciones", "indice_igc"]),
            number("momentum_neto", "Momentum neto", &["cancelaciones", "momentum_neto"]),
        ],
        lookup: None,
    },
    DatasetDefinition {
        key: "rc",
        label: "Indicadores RC (Reclutas y pólizas)",
        description: "Métricas mixtas de RC, prospectos y pólizas derivadas",
        scopes: GOAL,
        fields: &[
            number("prospectos_total", "Prospectos totales", &["rc", "prospectos_total"]),
            number("reclutas_calidad", "Reclutas de calidad", &["rc", "reclutas_calidad"]),
            number("prospectos_con_cita", "Prospectos con cita", &["rc", "prospectos_con_cita"]),
            number("prospectos_seguimiento", "Prospectos en seguimiento", &["rc", "prospectos_seguimiento"]),
            number("prospectos_descartados", "Prospectos descartados", &["rc", "prospectos_descartados"]),
            number("polizas_total", "Pólizas asociadas", &["rc", "polizas_total"]),
            number("polizas_vigentes", "Pólizas vigentes (RC)", &["rc", "polizas_vigentes"]),
            number("polizas_anuladas", "Pólizas anuladas (RC)", &["rc", "polizas_anuladas"]),
            number("rc_vigencia", "RC vigencia", &["rc", "rc_vigencia"]),
            number("permanencia", "Permanencia", &["rc", "permanencia"]),
            number("reclutas_calidad_ratio", "% reclutas de calidad", &["rc", "reclutas_calidad_ratio"]),
        ],
        lookup: None,
    },
    DatasetDefinition {
        key: "tenure",
        label: "Antigüedad asesor",
        description: "Antigüedad del asesor en meses desde su primera emisión",
        scopes: ELIGIBILITY,
        fields: &[number("tenure_meses", "Meses desde la primera emisión", &["tenure_meses"])],
        lookup: None,
    },
    DatasetDefinition {
        key: "polizas_por_producto",
        label: "Pólizas por producto específico",
        description: "Conteo de pólizas filtradas por productos parametrizados específicos",
        scopes: BOTH,
        fields: &[
            number("cantidad", "Cantidad de pólizas", &["datasets", "polizas_por_producto", "cantidad"]),
            text("producto_ids", "IDs de productos", &["datasets", "polizas_por_producto", "producto_ids"]),
        ],
        lookup: None,
    },
    DatasetDefinition {
        key: "polizas_prima_minima",
        label: "Pólizas con prima mínima",
        description: "Pólizas que cumplen con un umbral de prima mínima",
        scopes: BOTH,
        fields: &[
            number("cantidad", "Cantidad de pólizas", &["datasets", "polizas_prima_minima", "cantidad"]),
            number("prima_minima_mxn", "Prima mínima (MXN)", &["datasets", "polizas_prima_minima", "prima_minima_mxn"]),
        ],
        lookup: Some(LookupParam {
            param: "prima_minima_mxn",
            prefix: "prima_",
        }),
    },
    DatasetDefinition {
        key: "polizas_recientes",
        label: "Pólizas emitidas recientemente",
        description: "Pólizas emitidas dentro de una ventana de tiempo, opcionalmente solo iniciales",
        scopes: BOTH,
        fields: &[
            number("cantidad", "Cantidad de pólizas", &["datasets", "polizas_recientes", "cantidad"]),
            number("dias_ventana", "Ventana de días (emisión)", &["datasets", "polizas_recientes", "dias_ventana"]),
            boolean("solo_iniciales", "Solo pólizas iniciales", &["datasets", "polizas_recientes", "solo_iniciales"]),
            number(
                "dias_verificacion_previa",
                "Días verificación historial previo",
                &["datasets", "polizas_recientes", "dias_verificacion_previa"],
            ),
        ],
        lookup: Some(LookupParam {
            param: "dias_ventana",
            prefix: "ventana_",
        }),
    },
    DatasetDefinition {
        key: "clasificacion_asesor",
        label: "Clasificación asesor (PF activo)",
        description: "Clasificación corporativa y bandera de elegibilidad",
        scopes: ELIGIBILITY,
        fields: &[
            text("permitido", "Clasificación permitida", &["datasets", "clasificacion_asesor", "permitido"]),
            text("clasificacion", "Clasificación actual", &["datasets", "clasificacion_asesor", "clasificacion"]),
            text("mes_conexion", "Mes de conexión", &["datasets", "clasificacion_asesor", "mes_conexion"]),
        ],
        lookup: None,
    },
    flag_dataset!(
        "primera_poliza_bonus",
        "Bono primera póliza",
        "Indica si aplica el bono de primera póliza",
        ELIGIBILITY
    ),
    flag_dataset!(
        "bono_grupo_1",
        "Validación Bono Grupo 1",
        "Resultado precalculado de condiciones para el Bono Grupo 1",
        GOAL
    ),
    DatasetDefinition {
        key: "mix_vida",
        label: "Mix de negocio Vida",
        description: "Mezcla Vida vs resto de líneas del asesor",
        scopes: ELIGIBILITY,
        fields: &[number("ratio", "Ratio Vida", &["datasets", "mix_vida", "ratio"])],
        lookup: None,
    },
    flag_dataset!(
        "prima_minima",
        "Validación prima mínima",
        "Validación automática de prima mínima requerida",
        ELIGIBILITY,
        number("prima_minima", "Prima minima", &["datasets", "prima_minima", "prima_minima"])
    ),
    DatasetDefinition {
        key: "msi_inicial",
        label: "MSI inicial pólizas",
        description: "Determina si aplica MSI para casos iniciales",
        scopes: ELIGIBILITY,
        fields: &[text("aplica", "Aplica condición", &["datasets", "msi_inicial", "aplica"])],
        lookup: None,
    },
    DatasetDefinition {
        key: "msi_renovacion_gmmi",
        label: "MSI renovación GMMI",
        description: "MSI para renovaciones GMMI ya evaluada",
        scopes: ELIGIBILITY,
        fields: &[text("aplica", "Aplica condición", &["datasets", "msi_renovacion_gmmi", "aplica"])],
        lookup: None,
    },
    DatasetDefinition {
        key: "comisiones_dobles",
        label: "Convenciones al doble",
        description: "Marca si las comisiones cuentan doble en la campaña",
        scopes: GOAL,
        fields: &[
            text("activo", "Conteo doble activo", &["datasets", "comisiones_dobles", "activo"]),
            text("mes", "Mes aplicable", &["datasets", "comisiones_dobles", "mes"]),
        ],
        lookup: None,
    },
    flag_dataset!(
        "vida_dolares",
        "Tipo de cambio preferencial (TCP)",
        "Indicador de cumplimiento para objetivos de Vida en dólares",
        ELIGIBILITY,
        number("prima_usd", "Prima en USD", &["datasets", "vida_dolares", "prima_usd"])
    ),
    flag_dataset!(
        "momentum_prima_minima",
        "Momentum prima mínima",
        "Verifica si Momentum alcanzó la prima mínima acumulada",
        ELIGIBILITY,
        number(
            "recibo_minimo_mxn",
            "Recibo mínimo (MXN)",
            &["datasets", "momentum_prima_minima", "recibo_minimo_mxn"]
        )
    ),
    DatasetDefinition {
        key: "region_dcn",
        label: "Campañas exclusivas DCN",
        description: "Bandera de pertenencia a la región DCN",
        scopes: ELIGIBILITY,
        fields: &[text("es_dcn", "Pertenece a DCN", &["datasets", "region_dcn", "es_dcn"])],
        lookup: None,
    },
    DatasetDefinition {
        key: "meta_comisiones",
        label: "Meta de comisiones",
        description: "Estado de la meta de comisiones (avance y objetivo)",
        scopes: GOAL,
        fields: &[
            text("meta_cumplida", "Meta cumplida", &["datasets", "meta_comisiones", "meta_cumplida"]),
            number("avance_actual", "Avance actual (MXN)", &["datasets", "meta_comisiones", "avance_actual"]),
            number("meta_objetivo", "Meta objetivo (MXN)", &["datasets", "meta_comisiones", "meta_objetivo"]),
        ],
        lookup: None,
    },
    DatasetDefinition {
        key: "ranking_r1",
        label: "Ranking R1",
        description: "Posición, estatus y puntos del ranking R1 calculados por la ETL",
        scopes: GOAL,
        fields: &[
            number("posicion", "Posición en ranking", &["datasets", "ranking_r1", "posicion"]),
            text("estatus", "Estatus del ranking", &["datasets", "ranking_r1", "estatus"]),
            number("puntos", "Puntos acumulados", &["datasets", "ranking_r1", "puntos"]),
        ],
        lookup: None,
    },
    flag_dataset!(
        "promotor_360_index",
        "Promotor 360° nacional",
        "Puntaje y bandera del índice Promotor 360°",
        GOAL,
        number("puntaje", "Puntaje", &["datasets", "promotor_360_index", "puntaje"])
    ),
    flag_dataset!(
        "promotor_360_dcn_index",
        "Promotor 360° DCN",
        "Versión DCN del índice Promotor 360°",
        GOAL,
        number("puntaje", "Puntaje", &["datasets", "promotor_360_dcn_index", "puntaje"])
    ),
    flag_dataset!(
        "graduados_por_generacion",
        "Graduación asesores",
        "Graduados por generación validados para la campaña",
        GOAL,
        number(
            "total_generaciones_validas",
            "Generaciones válidas",
            &["datasets", "graduados_por_generacion", "total_generaciones_validas"]
        )
    ),
    flag_dataset!(
        "asesores_ganadores",
        "Ganadores de campañas",
        "Consolidado de asesores ganadores asociados",
        GOAL,
        number("total", "Total asesores", &["datasets", "asesores_ganadores", "total"])
    ),
    flag_dataset!(
        "creciendo_contigo_score",
        "Creciendo Contigo",
        "Resultado del programa Creciendo Contigo",
        GOAL,
        number("puntaje", "Puntaje", &["datasets", "creciendo_contigo_score", "puntaje"])
    ),
    flag_dataset!(
        "promotores_asesores_ganadores",
        "Ganadores asociados a promotor",
        "Resumen por promotor de asesores ganadores",
        GOAL,
        number(
            "total_asesores",
            "Total asesores ganadores",
            &["datasets", "promotores_asesores_ganadores", "total_asesores"]
        ),
        text(
            "nivel_maximo",
            "Nivel máximo",
            &["datasets", "promotores_asesores_ganadores", "nivel_maximo"]
        )
    ),
    flag_dataset!(
        "asesores_proactivos",
        "Indicador de proactividad",
        "Conteo/bandera de asesores catalogados como proactivos",
        GOAL,
        number("total", "Total proactivos", &["datasets", "asesores_proactivos", "total"])
    ),
    DatasetDefinition {
        key: "asesores_conectados",
        label: "Conectividad asesores",
        description: "Conectividad de asesores dentro del rango definido",
        scopes: GOAL,
        fields: &[
            text("en_rango", "En rango", &["datasets", "asesores_conectados", "en_rango"]),
            number("total", "Total conectados", &["datasets", "asesores_conectados", "total"]),
        ],
        lookup: None,
    },
    flag_dataset!(
        "msi_promotor_condiciones",
        "MSI promotor",
        "Condiciones MSI específicas del promotor evaluadas por ETL",
        ELIGIBILITY
    ),
];

pub fn dataset_definition(key: &str) -> Option<&'static DatasetDefinition> {
    DATASET_DEFINITIONS.iter().find(|definition| definition.key == key)
}

pub fn dataset_field(key: &str, field: &str) -> Option<&'static DatasetField> {
    dataset_definition(key).and_then(|definition| definition.field(field))
}

pub fn definitions_for_scope(scope: RuleScope) -> Vec<&'static DatasetDefinition> {
    DATASET_DEFINITIONS
        .iter()
        .filter(|definition| definition.allows_scope(scope))
        .collect()
}

pub fn is_dataset_key(key: &str) -> bool {
    dataset_definition(key).is_some()
}

/// A problem found while validating a stored rule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleValidationIssue {
    pub rule_id: String,
    pub field: &'static str,
    pub message: String,
}

impl RuleValidationIssue {
    fn new(rule: &CampaignRule, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            field,
            message: message.into(),
        }
    }
}

const TEXT_OPERATORS: &[MetricOperator] = &[
    MetricOperator::Eq,
    MetricOperator::Neq,
    MetricOperator::Contains,
    MetricOperator::NotContains,
    MetricOperator::In,
];

const NUMBER_OPERATORS: &[MetricOperator] = &[
    MetricOperator::Gt,
    MetricOperator::Gte,
    MetricOperator::Lt,
    MetricOperator::Lte,
    MetricOperator::Eq,
    MetricOperator::Neq,
    MetricOperator::In,
];

/// Load-time validation of one rule. The evaluator stays total regardless; this catches
/// configurations that could never pass before they are stored.
pub fn validate_rule(rule: &CampaignRule) -> Vec<RuleValidationIssue> {
    let config = match RuleConfig::decode(&rule.rule_kind, &rule.config) {
        Ok(config) => config,
        Err(err) => return vec![RuleValidationIssue::new(rule, "config", err.to_string())],
    };

    let RuleCondition::MetricCondition(condition) = &config.condition else {
        return Vec::new();
    };

    let mut issues = Vec::new();
    let value_type = match dataset_definition(&condition.dataset) {
        Some(definition) => {
            if !definition.allows_scope(rule.scope) {
                issues.push(RuleValidationIssue::new(
                    rule,
                    "dataset",
                    format!(
                        "dataset '{}' does not allow the {} scope",
                        definition.key,
                        rule.scope.label()
                    ),
                ));
            }

            let Some(field) = definition.field(&condition.field) else {
                let available: Vec<&str> =
                    definition.fields.iter().map(|field| field.value).collect();
                issues.push(RuleValidationIssue::new(
                    rule,
                    "field",
                    format!(
                        "field '{}' does not exist in dataset '{}'; available: {}",
                        condition.field,
                        definition.key,
                        available.join(", ")
                    ),
                ));
                return issues;
            };

            let expected_type = field.field_type.value_type();
            if condition.value_type != expected_type {
                issues.push(RuleValidationIssue::new(
                    rule,
                    "valueType",
                    format!(
                        "field '{}' compares as {}, not {}",
                        field.value,
                        expected_type.label(),
                        condition.value_type.label()
                    ),
                ));
            }
            expected_type
        }
        None => {
            let custom_bag = condition.path.is_empty()
                || condition.path.first().map(String::as_str) == Some("datasets");
            if !custom_bag {
                issues.push(RuleValidationIssue::new(
                    rule,
                    "dataset",
                    format!("unknown dataset '{}'", condition.dataset),
                ));
            }
            condition.value_type
        }
    };

    let allowed = match value_type {
        ValueType::Number => NUMBER_OPERATORS,
        ValueType::Text => TEXT_OPERATORS,
    };
    if !allowed.contains(&condition.operator) {
        issues.push(RuleValidationIssue::new(
            rule,
            "operator",
            format!(
                "operator '{}' is not valid for {} values",
                condition.operator.as_str(),
                value_type.label()
            ),
        ));
    }

    let expected = condition.expected_text();
    match value_type {
        ValueType::Number => {
            let parts: Vec<&str> = if condition.operator == MetricOperator::In {
                expected.split(',').map(str::trim).collect()
            } else {
                vec![expected.trim()]
            };
            let numeric = parts
                .iter()
                .all(|part| !part.is_empty() && part.parse::<f64>().map(f64::is_finite).unwrap_or(false));
            if !numeric {
                issues.push(RuleValidationIssue::new(
                    rule,
                    "value",
                    format!("'{expected}' is not a valid number"),
                ));
            }
        }
        ValueType::Text => {
            let allow_empty = matches!(
                condition.operator,
                MetricOperator::Eq
                    | MetricOperator::Neq
                    | MetricOperator::Contains
                    | MetricOperator::NotContains
            );
            if !allow_empty && expected.trim().is_empty() {
                issues.push(RuleValidationIssue::new(
                    rule,
                    "value",
                    "an expected value is required",
                ));
            }
        }
    }

    issues
}

pub fn validate_rules(rules: &[CampaignRule]) -> Vec<RuleValidationIssue> {
    rules.iter().flat_map(validate_rule).collect()
}
