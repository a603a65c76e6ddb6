use serde_json::{json, Value};

/// JSON schema of the ReactiveSearch request body.
pub fn rs_query_schema() -> Value {
    let string_or_weighted = json!({
        "oneOf": [
            { "type": "string" },
            {
                "type": "object",
                "properties": {
                    "field": { "type": "string" },
                    "weight": { "type": "number" }
                },
                "required": ["field"]
            }
        ]
    });

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "ReactiveSearch request",
        "type": "object",
        "required": ["query"],
        "properties": {
            "query": {
                "type": "array",
                "minItems": 1,
                "items": { "$ref": "#/definitions/query" }
            },
            "settings": { "$ref": "#/definitions/settings" }
        },
        "definitions": {
            "settings": {
                "type": "object",
                "properties": {
                    "recordAnalytics": { "type": "boolean" },
                    "userId": { "type": "string" },
                    "customEvents": {
                        "type": "object",
                        "additionalProperties": {
                            "oneOf": [
                                { "type": "string" },
                                { "type": "array", "items": { "type": "string" } }
                            ]
                        }
                    },
                    "enableQueryRules": { "type": "boolean" },
                    "useCache": { "type": "boolean" }
                }
            },
            "react": {
                "oneOf": [
                    { "type": "string" },
                    { "type": "array", "items": { "$ref": "#/definitions/react" } },
                    {
                        "type": "object",
                        "properties": {
                            "and": { "$ref": "#/definitions/react" },
                            "or": { "$ref": "#/definitions/react" },
                            "not": { "$ref": "#/definitions/react" }
                        },
                        "additionalProperties": false
                    }
                ]
            },
            "query": {
                "type": "object",
                "required": ["id"],
                "properties": {
                    "id": { "type": "string", "minLength": 1 },
                    "type": {
                        "type": "string",
                        "enum": ["search", "term", "range", "geo", "suggestion"],
                        "default": "search"
                    },
                    "dataField": {
                        "oneOf": [
                            string_or_weighted.clone(),
                            { "type": "array", "items": string_or_weighted }
                        ]
                    },
                    "fieldWeights": { "type": "array", "items": { "type": "number" } },
                    "index": { "type": "string" },
                    "from": { "type": "integer", "minimum": 0 },
                    "size": { "type": "integer", "minimum": 0 },
                    "value": {},
                    "queryFormat": { "type": "string" },
                    "fuzziness": { "type": ["integer", "string"] },
                    "queryString": { "type": "boolean" },
                    "searchOperators": { "type": "boolean" },
                    "enableSynonyms": { "type": "boolean", "default": true },
                    "highlight": { "type": "boolean" },
                    "highlightField": { "type": ["string", "array"] },
                    "customHighlight": { "type": "object" },
                    "aggregationField": { "type": "string" },
                    "aggregations": { "type": "array", "items": { "type": "string" } },
                    "aggregationSize": { "type": "integer", "minimum": 0 },
                    "aggregationInclude": {},
                    "aggregationExclude": {},
                    "after": { "type": "object" },
                    "pagination": { "type": "boolean" },
                    "categoryField": { "type": "string" },
                    "categoryValue": { "type": "string" },
                    "selectAllLabel": { "type": "string" },
                    "showMissing": { "type": "boolean" },
                    "missingLabel": { "type": "string", "default": "N/A" },
                    "nestedField": { "type": "string" },
                    "distinctField": { "type": "string" },
                    "distinctFieldConfig": { "type": "object" },
                    "includeFields": { "type": "array", "items": { "type": "string" } },
                    "excludeFields": { "type": "array", "items": { "type": "string" } },
                    "includeNullValues": { "type": "boolean" },
                    "interval": { "type": "integer", "minimum": 1 },
                    "rankFeature": { "type": "object" },
                    "defaultQuery": { "type": "object" },
                    "customQuery": { "type": "object" },
                    "sortBy": { "type": "string", "enum": ["asc", "desc", "count"] },
                    "sortField": { "type": "string" },
                    "react": { "$ref": "#/definitions/react" },
                    "execute": { "type": "boolean", "default": true }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lists_query_fields() {
        let schema = rs_query_schema();
        let props = &schema["definitions"]["query"]["properties"];
        for key in ["id", "dataField", "react", "customQuery", "execute"] {
            assert!(props.get(key).is_some(), "missing {}", key);
        }
    }
}
